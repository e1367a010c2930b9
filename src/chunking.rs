use crate::config::RagConfig;
use crate::error::{RagError, Result};
use std::iter::FusedIterator;

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The actual text content of this chunk
    pub text: String,
    /// Identifier of the document this chunk belongs to
    pub document_id: String,
    /// Position of this chunk within the document, starting at 0
    pub sequence: usize,
    /// Character offset of the first character in the cleaned document
    pub start_position: usize,
    /// Character offset one past the last character
    pub end_position: usize,
    /// Leading characters shared with the previous chunk
    pub overlap: usize,
}

impl TextChunk {
    /// Length in characters
    pub fn len(&self) -> usize {
        self.end_position - self.start_position
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The part of this chunk not already covered by the previous one
    pub fn fresh_text(&self) -> &str {
        let skip = self
            .text
            .char_indices()
            .nth(self.overlap)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len());
        &self.text[skip..]
    }
}

/// Fixed-size sliding-window splitter, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chunk_size: usize,
    overlap_size: usize,
}

impl Chunker {
    pub fn new(max_chunk_size: usize, overlap_size: usize) -> Result<Self> {
        if max_chunk_size == 0 || overlap_size == 0 {
            return Err(RagError::InvalidConfig(
                "chunk size and overlap must be positive".to_string(),
            ));
        }
        if overlap_size >= max_chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap_size, max_chunk_size
            )));
        }
        Ok(Chunker {
            max_chunk_size,
            overlap_size,
        })
    }

    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Chunker::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    /// Distance between the starts of consecutive windows
    pub fn stride(&self) -> usize {
        self.max_chunk_size - self.overlap_size
    }

    /// Lazily split `text` into chunks. Call again to restart from the beginning.
    ///
    /// Text no longer than the chunk size (including empty text) yields exactly one chunk.
    pub fn chunks<'a>(&self, document_id: &'a str, text: &'a str) -> Chunks<'a> {
        Chunks {
            chunker: *self,
            document_id,
            text,
            byte_start: 0,
            char_start: 0,
            sequence: 0,
            done: false,
        }
    }
}

/// Iterator returned by [`Chunker::chunks`]
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    chunker: Chunker,
    document_id: &'a str,
    text: &'a str,
    byte_start: usize,
    char_start: usize,
    sequence: usize,
    done: bool,
}

impl Iterator for Chunks<'_> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<TextChunk> {
        if self.done {
            return None;
        }

        let rest = &self.text[self.byte_start..];
        let (window_bytes, window_chars) = advance(rest, self.chunker.max_chunk_size);

        let chunk = TextChunk {
            text: rest[..window_bytes].to_string(),
            document_id: self.document_id.to_string(),
            sequence: self.sequence,
            start_position: self.char_start,
            end_position: self.char_start + window_chars,
            overlap: if self.sequence == 0 {
                0
            } else {
                self.chunker.overlap_size
            },
        };

        if window_bytes == rest.len() {
            self.done = true;
        } else {
            let (stride_bytes, stride_chars) = advance(rest, self.chunker.stride());
            self.byte_start += stride_bytes;
            self.char_start += stride_chars;
        }
        self.sequence += 1;

        Some(chunk)
    }
}

impl FusedIterator for Chunks<'_> {}

/// Byte and char length of the first `n` characters of `text` (or all of it if shorter)
fn advance(text: &str, n: usize) -> (usize, usize) {
    match text.char_indices().nth(n) {
        Some((byte, _)) => (byte, n),
        None => (text.len(), text.chars().count()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(len: usize) -> String {
        "The quick brown fox jumps over the lazy dog. "
            .chars()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn test_three_chunks_for_2500_chars() {
        let text = sample_text(2500);
        let chunker = Chunker::new(1000, 100).unwrap();
        let chunks: Vec<TextChunk> = chunker.chunks("doc", &text).collect();

        let lengths: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lengths, vec![1000, 1000, 700]);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().skip(900).collect();
            let head: String = pair[1].text.chars().take(100).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_chunks_reconstruct_text() {
        let texts = vec![
            sample_text(1),
            sample_text(37),
            sample_text(1000),
            sample_text(1901),
            "héllo wörld — ünïcödé 日本語のテキスト ".repeat(40),
        ];
        for text in &texts {
            for (max, overlap) in [(10, 1), (10, 9), (64, 16), (1000, 100)] {
                let chunker = Chunker::new(max, overlap).unwrap();
                let chunks: Vec<TextChunk> = chunker.chunks("doc", text).collect();

                let rebuilt: String = chunks.iter().map(|c| c.fresh_text()).collect();
                assert_eq!(&rebuilt, text, "max={} overlap={}", max, overlap);

                for (i, chunk) in chunks.iter().enumerate() {
                    assert!(chunk.text.chars().count() <= max);
                    assert_eq!(chunk.text.chars().count(), chunk.len());
                    assert_eq!(chunk.sequence, i);
                }
                for pair in chunks.windows(2) {
                    assert_eq!(pair[1].overlap, overlap);
                    assert_eq!(pair[0].end_position - pair[1].start_position, overlap);
                }
            }
        }
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunker = Chunker::new(100, 10).unwrap();
        let chunks: Vec<TextChunk> = chunker.chunks("doc", "short").collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short");
        assert_eq!(chunks[0].overlap, 0);

        let exact = sample_text(100);
        assert_eq!(chunker.chunks("doc", &exact).count(), 1);
        assert_eq!(chunker.chunks("doc", "").count(), 1);
    }

    #[test]
    fn test_chunks_are_restartable() {
        let text = sample_text(450);
        let chunker = Chunker::new(100, 25).unwrap();
        let mut first = chunker.chunks("doc", &text);
        let head = first.next().unwrap();
        let replay = first.clone();

        let all: Vec<TextChunk> = chunker.chunks("doc", &text).collect();
        assert_eq!(all[0], head);
        assert_eq!(replay.collect::<Vec<_>>(), all[1..].to_vec());
        assert_eq!(chunker.chunks("doc", &text).collect::<Vec<_>>(), all);
    }

    #[test]
    fn test_invalid_chunker_config() {
        assert!(matches!(
            Chunker::new(100, 100),
            Err(RagError::InvalidConfig(_))
        ));
        assert!(matches!(
            Chunker::new(100, 200),
            Err(RagError::InvalidConfig(_))
        ));
        assert!(matches!(Chunker::new(0, 0), Err(RagError::InvalidConfig(_))));
        assert!(matches!(Chunker::new(10, 0), Err(RagError::InvalidConfig(_))));
    }
}
