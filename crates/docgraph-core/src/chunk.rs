//! Overlapping, paragraph-aware text chunker.
//!
//! Every chunk is a contiguous slice of the input body, so
//! `content == body[start_offset..end_offset]` always holds. Consecutive
//! chunks overlap by up to `overlap` bytes and together cover the whole body
//! with no gaps; the last chunk always ends at `body.len()`.
//!
//! # Algorithm
//!
//! 1. A body no longer than `chunk_size` becomes exactly one chunk.
//! 2. Paragraph mode: paragraphs (runs of non-blank lines) are accumulated
//!    until the next one would push the chunk past `chunk_size`. The chunk
//!    is flushed and the next one starts inside its tail (the overlap).
//!    A paragraph too large to fit even on its own is hard-split with the
//!    fixed-size window.
//! 3. Fixed-size mode: a `chunk_size` window advancing by
//!    `chunk_size - overlap`, never by less than one character.
//! 4. Overlap starts are moved forward past a partial word when a space is
//!    available inside the overlap window.
//! 5. Chunks shorter than `min_chunk_size` are merged into their successor.
//!
//! Sizes and offsets are measured in bytes and always land on UTF-8 char
//! boundaries.
//!
//! # Example
//!
//! ```rust
//! use docgraph_core::chunk::{Chunker, ChunkingOptions};
//!
//! let chunker = Chunker::new(ChunkingOptions::new(1000, 100, true, 0).unwrap());
//! let chunks = chunker.chunk("Hello world.\n\nSecond paragraph.");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use serde::Serialize;

use crate::error::RagError;

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkingOptions {
    chunk_size: usize,
    overlap: usize,
    respect_paragraph_boundaries: bool,
    min_chunk_size: usize,
}

impl ChunkingOptions {
    /// Build options, rejecting `chunk_size == 0` and `overlap >= chunk_size`.
    ///
    /// Signed arguments so that negative values coming from configuration
    /// are rejected here rather than wrapping.
    pub fn new(
        chunk_size: i64,
        overlap: i64,
        respect_paragraph_boundaries: bool,
        min_chunk_size: i64,
    ) -> Result<Self, RagError> {
        if chunk_size <= 0 {
            return Err(RagError::InvalidOptions(format!(
                "chunk_size must be > 0 (got {})",
                chunk_size
            )));
        }
        if overlap < 0 {
            return Err(RagError::InvalidOptions(format!(
                "overlap must be >= 0 (got {})",
                overlap
            )));
        }
        if overlap >= chunk_size {
            return Err(RagError::InvalidOptions(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        if min_chunk_size < 0 {
            return Err(RagError::InvalidOptions(format!(
                "min_chunk_size must be >= 0 (got {})",
                min_chunk_size
            )));
        }
        Ok(Self {
            chunk_size: chunk_size as usize,
            overlap: overlap as usize,
            respect_paragraph_boundaries,
            min_chunk_size: min_chunk_size as usize,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn respect_paragraph_boundaries(&self) -> bool {
        self.respect_paragraph_boundaries
    }

    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            overlap: 200,
            respect_paragraph_boundaries: true,
            min_chunk_size: 100,
        }
    }
}

/// One chunk of a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub index: usize,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Splits bodies according to a fixed set of [`ChunkingOptions`].
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    options: ChunkingOptions,
}

impl Chunker {
    pub fn new(options: ChunkingOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ChunkingOptions {
        &self.options
    }

    /// Cheap pre-check: does `body` need more than one chunk?
    pub fn should_chunk(&self, body: Option<&str>) -> bool {
        match body {
            Some(b) => !b.is_empty() && b.len() > self.options.chunk_size,
            None => false,
        }
    }

    /// `ceil(len / (chunk_size - overlap))`, at least 1.
    pub fn estimate_chunk_count(&self, body: &str) -> usize {
        let step = self.options.chunk_size - self.options.overlap;
        body.len().div_ceil(step).max(1)
    }

    /// Split `body` into ordered, overlapping chunks.
    ///
    /// Deterministic; always returns at least one chunk.
    pub fn chunk(&self, body: &str) -> Vec<TextChunk> {
        if body.len() <= self.options.chunk_size {
            return vec![TextChunk {
                index: 0,
                content: body.to_string(),
                start_offset: 0,
                end_offset: body.len(),
            }];
        }

        let mut spans = if self.options.respect_paragraph_boundaries {
            self.paragraph_spans(body)
        } else {
            self.window_spans(body, 0, body.len())
        };

        if let Some(last) = spans.last_mut() {
            last.1 = body.len();
        }

        if self.options.min_chunk_size > 0 && spans.len() > 1 {
            spans = merge_small(spans, self.options.min_chunk_size);
        }

        spans
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| TextChunk {
                index,
                content: body[start..end].to_string(),
                start_offset: start,
                end_offset: end,
            })
            .collect()
    }

    fn paragraph_spans(&self, body: &str) -> Vec<(usize, usize)> {
        let size = self.options.chunk_size;
        let mut spans = Vec::new();
        let mut chunk_start = 0;
        let mut pending_end: Option<usize> = None;

        for (_, para_end) in paragraphs(body) {
            if para_end - chunk_start <= size {
                pending_end = Some(para_end);
                continue;
            }

            if let Some(end) = pending_end.take() {
                spans.push((chunk_start, end));
                chunk_start = self.overlap_start(body, chunk_start, end);
                if para_end - chunk_start <= size {
                    pending_end = Some(para_end);
                    continue;
                }
            }

            // Too large even on its own: hard split.
            let pieces = self.window_spans(body, chunk_start, para_end);
            if let Some(&(last_start, last_end)) = pieces.last() {
                spans.extend(pieces);
                chunk_start = self.overlap_start(body, last_start, last_end);
            }
        }

        match pending_end {
            Some(end) => spans.push((chunk_start, end)),
            None if spans.is_empty() => spans.push((0, body.len())),
            None => {}
        }
        spans
    }

    /// Fixed windows covering `[from, to)`.
    fn window_spans(&self, body: &str, from: usize, to: usize) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut start = from;
        while start < to {
            let mut end = floor_char_boundary(body, (start + self.options.chunk_size).min(to));
            if end <= start {
                end = next_char_boundary(body, start);
            }
            spans.push((start, end));
            if end >= to {
                break;
            }
            let next = self.overlap_start(body, start, end);
            start = if next > start {
                next
            } else {
                next_char_boundary(body, start)
            };
        }
        spans
    }

    /// Where the chunk following `[start, end)` begins.
    ///
    /// The last `overlap` bytes of the previous chunk (all of it if shorter),
    /// skipping a leading partial word when the window contains a space.
    fn overlap_start(&self, body: &str, start: usize, end: usize) -> usize {
        if self.options.overlap == 0 {
            return end;
        }
        let candidate = ceil_char_boundary(body, end.saturating_sub(self.options.overlap).max(start));
        if candidate == start || is_word_start(body, candidate) {
            return candidate;
        }
        match body[candidate..end].find(char::is_whitespace) {
            Some(pos) => {
                let ws = candidate + pos;
                next_char_boundary(body, ws).min(end)
            }
            None => candidate,
        }
    }
}

/// Byte ranges of paragraphs: maximal runs of lines that are not blank.
fn paragraphs(body: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut pos = 0;
    for line in body.split_inclusive('\n') {
        let line_start = pos;
        pos += line.len();
        if line.trim().is_empty() {
            if let Some(p) = current.take() {
                out.push(p);
            }
            continue;
        }
        let content_end = line_start + line.trim_end().len();
        current = Some(match current {
            Some((s, _)) => (s, content_end),
            None => (line_start, content_end),
        });
    }
    if let Some(p) = current {
        out.push(p);
    }
    out
}

/// Merge every span shorter than `min` into the one after it.
fn merge_small(spans: Vec<(usize, usize)>, min: usize) -> Vec<(usize, usize)> {
    let mut out: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    let mut carry: Option<usize> = None;
    let last = spans.len() - 1;
    for (i, (start, end)) in spans.into_iter().enumerate() {
        let start = carry.take().unwrap_or(start);
        if end - start < min && i < last {
            carry = Some(start);
            continue;
        }
        out.push((start, end));
    }
    out
}

fn is_word_start(body: &str, pos: usize) -> bool {
    pos == 0
        || body[..pos]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace)
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i.min(s.len())
}

fn next_char_boundary(s: &str, i: usize) -> usize {
    s[i..]
        .chars()
        .next()
        .map(|c| i + c.len_utf8())
        .unwrap_or(s.len())
}
