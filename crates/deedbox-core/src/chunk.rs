//! Boundary-aware overlapping text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `max_chars` bytes, with
//! consecutive chunks sharing roughly `overlap_chars` bytes of context.
//!
//! # Algorithm
//!
//! 1. Skip leading whitespace at the current position.
//! 2. If the rest fits in `max_chars`, emit it as the final chunk.
//! 3. Otherwise look for a break inside the last `boundary_tolerance` bytes
//!    of the window, preferring a paragraph break (`\n\n`), then a line
//!    break, then any whitespace. Without one, hard-cut at `max_chars`
//!    (snapped back to a UTF-8 char boundary).
//! 4. Start the next chunk `overlap_chars` before the cut, moved forward to
//!    the next word start so overlap never begins mid-word.
//!
//! The output is a lazy iterator. It is `Clone`, so a consumer can restart
//! it, and identical input with an identical config always yields an
//! identical sequence. Empty or whitespace-only input yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use deedbox_core::chunk::{chunk_text, ChunkConfig};
//!
//! let cfg = ChunkConfig::default();
//! let chunks: Vec<_> = chunk_text("leases/unit5.txt", "Rent is due monthly.", &cfg)
//!     .unwrap()
//!     .collect();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Approximate characters-per-token ratio used to read token-based config.
pub const CHARS_PER_TOKEN: usize = 4;

/// Chunk sizing parameters, in bytes of UTF-8 text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    /// How far back from the hard limit a natural break may be taken.
    pub boundary_tolerance: usize,
}

impl ChunkConfig {
    /// Build a config from token counts (`× CHARS_PER_TOKEN`).
    pub fn from_tokens(max_tokens: usize, overlap_tokens: usize, tolerance_tokens: usize) -> Self {
        Self {
            max_chars: max_tokens * CHARS_PER_TOKEN,
            overlap_chars: overlap_tokens * CHARS_PER_TOKEN,
            boundary_tolerance: tolerance_tokens * CHARS_PER_TOKEN,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(Error::Config("chunk max length must be > 0".into()));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than max length ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }

    /// Tolerance clamped so every cut lands past `start + overlap`,
    /// which keeps the iterator making forward progress.
    fn effective_tolerance(&self) -> usize {
        self.boundary_tolerance
            .min(self.max_chars - self.overlap_chars - 1)
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::from_tokens(300, 50, 50)
    }
}

/// Chunk `text` for `document_path`.
///
/// Fails with [`Error::Config`] when `overlap_chars >= max_chars` or
/// `max_chars == 0`; otherwise returns a lazy iterator over the chunks.
pub fn chunk_text<'a>(
    document_path: &'a str,
    text: &'a str,
    config: &ChunkConfig,
) -> Result<Chunks<'a>> {
    config.validate()?;
    Ok(Chunks {
        document_path,
        text,
        config: *config,
        pos: 0,
        next_index: 0,
        done: false,
    })
}

/// Lazy, finite sequence of chunks. Clone it to restart from the beginning.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    document_path: &'a str,
    text: &'a str,
    config: ChunkConfig,
    pos: usize,
    next_index: usize,
    done: bool,
}

impl<'a> Chunks<'a> {
    fn find_cut(&self, start: usize) -> usize {
        let text = self.text;
        let mut hard = snap_to_char_boundary(text, start + self.config.max_chars);
        if hard <= start {
            hard = next_char_boundary(text, start);
        }

        let lo = hard
            .saturating_sub(self.config.effective_tolerance())
            .max(start + 1);
        let lo = snap_to_char_boundary(text, lo).max(start);
        let window = &text[lo..hard];

        if let Some(i) = window.rfind("\n\n") {
            return lo + i + 2;
        }
        if let Some(i) = window.rfind('\n') {
            return lo + i + 1;
        }
        if let Some((i, c)) = window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            return lo + i + c.len_utf8();
        }
        hard
    }

    fn next_start(&self, start: usize, cut: usize) -> usize {
        let overlap = self.config.overlap_chars;
        if overlap == 0 {
            return cut;
        }
        let text = self.text;
        let mut next = snap_to_char_boundary(text, cut.saturating_sub(overlap));
        if next <= start {
            next = next_char_boundary(text, start);
        }
        let mid_word = text[..next]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_whitespace())
            && text[next..].chars().next().is_some_and(|c| !c.is_whitespace());
        if mid_word {
            if let Some(i) = text[next..cut].find(char::is_whitespace) {
                next += i;
            }
        }
        next
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        while !self.done {
            let rest = &self.text[self.pos..];
            let start = self.pos + (rest.len() - rest.trim_start().len());
            if start >= self.text.len() {
                self.done = true;
                return None;
            }

            let end = if self.text.len() - start <= self.config.max_chars {
                self.done = true;
                self.text.len()
            } else {
                let cut = self.find_cut(start);
                self.pos = self.next_start(start, cut);
                cut
            };

            let piece = self.text[start..end].trim_end();
            if piece.is_empty() {
                continue;
            }
            let chunk = make_chunk(self.document_path, self.next_index, piece);
            self.next_index += 1;
            return Some(chunk);
        }
        None
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// First char boundary strictly after `index`.
fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .char_indices()
        .nth(1)
        .map(|(i, _)| index + i)
        .unwrap_or(s.len())
}

/// Create a [`Chunk`] with a SHA-256 content hash.
fn make_chunk(document_path: &str, index: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        document_path: document_path.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
