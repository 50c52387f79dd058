use crate::error::IngestError;
use crate::models::PipelineOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_000,
            overlap_chars: 200,
        }
    }
}

impl From<&PipelineOptions> for ChunkingConfig {
    fn from(value: &PipelineOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, IngestError> {
        let config = Self {
            max_chars,
            overlap_chars,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_chars ({}) must be less than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Half-open span of a chunk, in char offsets of the chunked text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

impl ChunkSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    Word,
    Sentence,
    Line,
    Paragraph,
}

const BOUNDARY_PRIORITY: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Word,
];

/// Lays out chunk spans over `text`.
///
/// Every span is at most `max_chars` long. Each span after the first starts
/// exactly `overlap_chars` before the end of its predecessor, so dropping
/// the first `overlap_chars` of every later chunk and concatenating gives
/// back `text`. A span ends right after the highest-priority boundary
/// (blank line, newline, sentence end, space) available in its window and
/// falls back to a hard cut.
pub fn chunk_spans(text: &str, config: ChunkingConfig) -> Result<Vec<ChunkSpan>, IngestError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < total {
        if total - start <= config.max_chars {
            spans.push(ChunkSpan { start, end: total });
            break;
        }

        let hard_end = start + config.max_chars;
        // The next span starts at end - overlap, which must move forward.
        let earliest_end = start + config.overlap_chars + 1;
        let end = best_break(&chars, start, earliest_end, hard_end).unwrap_or(hard_end);

        spans.push(ChunkSpan { start, end });
        start = end - config.overlap_chars;
    }

    Ok(spans)
}

pub fn split_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    let chars: Vec<char> = text.chars().collect();
    Ok(chunk_spans(text, config)?
        .into_iter()
        .map(|span| chars[span.start..span.end].iter().collect())
        .collect())
}

fn best_break(chars: &[char], start: usize, earliest: usize, latest: usize) -> Option<usize> {
    BOUNDARY_PRIORITY.iter().find_map(|boundary| {
        (earliest..=latest)
            .rev()
            .find(|&end| breaks_before(chars, start, end, *boundary))
    })
}

fn breaks_before(chars: &[char], start: usize, end: usize, boundary: Boundary) -> bool {
    let last = match end.checked_sub(1) {
        Some(index) if index >= start => chars[index],
        _ => return false,
    };
    let previous = end
        .checked_sub(2)
        .filter(|index| *index >= start)
        .map(|index| chars[index]);

    match boundary {
        Boundary::Paragraph => last == '\n' && previous == Some('\n'),
        Boundary::Line => last == '\n',
        Boundary::Sentence => {
            last.is_whitespace() && matches!(previous, Some('.') | Some('!') | Some('?'))
        }
        Boundary::Word => last == ' ',
    }
}
