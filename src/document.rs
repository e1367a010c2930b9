use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TXT: &str = "text/plain";

/// Cap on the decompressed size of `word/document.xml`
const MAX_DOCX_XML_BYTES: u64 = 50 * 1024 * 1024;

/// Lines at most this long that repeat this often in a PDF are treated as running headers/footers
const HEADER_MAX_CHARS: usize = 80;
const HEADER_MIN_REPEATS: usize = 3;

/// An uploaded document: raw bytes plus the declared type
#[derive(Debug, Clone)]
pub struct Document {
    /// Raw file content
    pub bytes: Vec<u8>,
    /// The declared MIME type (may be empty or generic)
    pub mime_type: String,
    /// Original file name, used to guess the type when the MIME type is not helpful
    pub file_name: Option<String>,
}

/// Formats the extractor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    Txt,
}

impl Document {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Document {
            bytes,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Create a new document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                RagError::ExtractionFailure(format!("Invalid file name: {}", path.display()))
            })?
            .to_string();

        // Detect MIME type
        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type: {}", mime_type);

        let bytes = fs::read(path).map_err(|e| {
            RagError::ExtractionFailure(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Ok(Document::new(bytes, mime_type).with_file_name(file_name))
    }

    /// Resolve the declared type, falling back to the file name extension
    pub fn kind(&self) -> Result<FileKind> {
        if let Some(kind) = FileKind::from_declared(&self.mime_type) {
            return Ok(kind);
        }

        let generic = matches!(
            essence(&self.mime_type).as_str(),
            "" | "application/octet-stream"
        );
        if generic {
            if let Some(name) = &self.file_name {
                let guessed = from_path(name).first_or_octet_stream().to_string();
                if let Some(kind) = FileKind::from_declared(&guessed) {
                    debug!("Guessed {:?} for {} from its extension", kind, name);
                    return Ok(kind);
                }
            }
        }

        Err(RagError::UnsupportedFormat(format!(
            "{}. Only PDF, DOCX and text files are supported.",
            if self.mime_type.is_empty() {
                self.file_name.as_deref().unwrap_or("unknown")
            } else {
                &self.mime_type
            }
        )))
    }
}

impl FileKind {
    /// Map a MIME type (or a bare `pdf`/`docx`/`txt`) to a kind
    pub fn from_declared(declared: &str) -> Option<FileKind> {
        match essence(declared).as_str() {
            "pdf" | MIME_PDF => Some(FileKind::Pdf),
            "docx" | MIME_DOCX => Some(FileKind::Docx),
            "txt" => Some(FileKind::Txt),
            mime if mime.starts_with("text/") => Some(FileKind::Txt),
            _ => None,
        }
    }
}

/// `Text/Plain; charset=utf-8` -> `text/plain`
fn essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_lowercase()
}

/// Extract cleaned plain text from a document
pub fn extract_text(document: &Document) -> Result<String> {
    let kind = document.kind()?;
    info!(
        "Extracting {:?} document ({} bytes)",
        kind,
        document.bytes.len()
    );

    let raw = match kind {
        FileKind::Pdf => extract_pdf(&document.bytes)?,
        FileKind::Docx => extract_docx(&document.bytes)?,
        FileKind::Txt => extract_txt(&document.bytes)?,
    };

    let cleaned = clean_text(&raw, kind == FileKind::Pdf);
    if cleaned.is_empty() {
        warn!("Extracted content is empty or contains only whitespace");
        return Err(RagError::ExtractionFailure(
            "document contains no text".to_string(),
        ));
    }

    debug!(
        "Extracted {} characters ({} before cleaning)",
        cleaned.chars().count(),
        raw.chars().count()
    );
    Ok(cleaned)
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed files
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(RagError::ExtractionFailure(format!("PDF: {}", e))),
        Err(_) => Err(RagError::ExtractionFailure(
            "PDF: parser aborted on malformed input".to_string(),
        )),
    }
}

fn extract_txt(bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| RagError::ExtractionFailure(format!("text is not valid UTF-8: {}", e)))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| RagError::ExtractionFailure(format!("DOCX: {}", e)))?;
    let entry = archive.by_name("word/document.xml").map_err(|_| {
        RagError::ExtractionFailure("DOCX: word/document.xml not found".to_string())
    })?;

    let mut xml = Vec::new();
    entry
        .take(MAX_DOCX_XML_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| RagError::ExtractionFailure(format!("DOCX: {}", e)))?;
    if xml.len() as u64 >= MAX_DOCX_XML_BYTES {
        return Err(RagError::ExtractionFailure(
            "DOCX: word/document.xml exceeds size limit".to_string(),
        ));
    }

    docx_paragraphs(&xml)
}

/// Collect `w:t` runs, ending each `w:p` paragraph with a newline
fn docx_paragraphs(xml: &[u8]) -> Result<String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(text)) if in_text => {
                let text = text
                    .unescape()
                    .map_err(|e| RagError::ExtractionFailure(format!("DOCX: {}", e)))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(RagError::ExtractionFailure(format!("DOCX: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// Best-effort cleanup of extracted text.
///
/// Removes control characters, collapses runs of spaces and blank lines, and,
/// for paginated sources, drops page numbers and running headers/footers.
pub fn clean_text(text: &str, strip_page_artifacts: bool) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let lines: Vec<String> = text
        .split(['\n', '\x0c'])
        .map(collapse_spaces)
        .collect();

    let repeated = if strip_page_artifacts {
        repeated_short_lines(&lines)
    } else {
        Vec::new()
    };

    let kept = lines.iter().filter(|line| {
        !(strip_page_artifacts && (is_page_number(line) || repeated.contains(line)))
    });

    // Keep at most one blank line between paragraphs
    let mut normalized = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in kept {
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !normalized.is_empty() {
            normalized.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        normalized.push_str(line);
        blank_run = 0;
    }

    normalized
}

/// Drop control characters and collapse runs of spaces/tabs within one line
fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev_space = true;
    for c in line.chars() {
        let c = if c == '\t' { ' ' } else { c };
        if c.is_control() {
            continue;
        }
        if c.is_whitespace() {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out.truncate(out.trim_end().len());
    out
}

fn repeated_short_lines(lines: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in lines {
        if !line.is_empty() && line.chars().count() <= HEADER_MAX_CHARS {
            *counts.entry(line.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count >= HEADER_MIN_REPEATS)
        .map(|(line, _)| line.to_string())
        .collect()
}

/// "12", "- 12 -", "Page 12", "page 3 of 10"
fn is_page_number(line: &str) -> bool {
    let lower = line.to_lowercase();
    let stripped = lower.trim_matches(|c: char| c == '-' || c == ' ');
    let stripped = stripped.strip_prefix("page ").unwrap_or(stripped);

    let mut parts = stripped.splitn(2, " of ");
    let first = parts.next().unwrap_or("");
    let is_num = |s: &str| !s.is_empty() && s.len() <= 4 && s.chars().all(|c| c.is_ascii_digit());

    match parts.next() {
        Some(total) => is_num(first) && is_num(total.trim()),
        None => is_num(first),
    }
}
