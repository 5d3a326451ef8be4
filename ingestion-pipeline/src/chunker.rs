use std::ops::Range;

use common::{error::AppError, utils::config::ChunkUnit};

/// Sizing parameters for splitting a document into overlapping chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chunk_size: usize,
    pub overlap: usize,
    pub unit: ChunkUnit,
}

impl ChunkingConfig {
    pub fn new(max_chunk_size: usize, overlap: usize, unit: ChunkUnit) -> Result<Self, AppError> {
        let config = Self {
            max_chunk_size,
            overlap,
            unit,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_chunk_size == 0 {
            return Err(AppError::Config(
                "max_chunk_size must be greater than zero".into(),
            ));
        }
        if self.overlap >= self.max_chunk_size {
            return Err(AppError::Config(format!(
                "overlap ({}) must be smaller than max_chunk_size ({})",
                self.overlap, self.max_chunk_size
            )));
        }
        Ok(())
    }

    /// Distance between the starts of two consecutive chunks.
    pub fn stride(&self) -> usize {
        self.max_chunk_size.saturating_sub(self.overlap).max(1)
    }

    /// Stable description of the parameters, folded into source fingerprints.
    pub fn layout(&self) -> String {
        let unit = match self.unit {
            ChunkUnit::Characters => "characters",
            ChunkUnit::Words => "words",
        };
        format!("{unit}:{}:{}", self.max_chunk_size, self.overlap)
    }
}

/// Split `text` into overlapping chunks.
///
/// Each chunk after the first starts `max_chunk_size - overlap` units into its
/// predecessor, and the last chunk is the first one that reaches the end of the
/// text. Empty input yields no chunks.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>, AppError> {
    config.validate()?;

    match config.unit {
        ChunkUnit::Characters => {
            let mut boundaries: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
            let len = boundaries.len();
            boundaries.push(text.len());

            Ok(windows(len, config)
                .filter_map(|range| {
                    let start = *boundaries.get(range.start)?;
                    let end = *boundaries.get(range.end)?;
                    text.get(start..end).map(str::to_string)
                })
                .collect())
        }
        ChunkUnit::Words => {
            let words: Vec<&str> = text.split_whitespace().collect();
            Ok(windows(words.len(), config)
                .filter_map(|range| words.get(range).map(|span| span.join(" ")))
                .collect())
        }
    }
}

fn windows(len: usize, config: &ChunkingConfig) -> impl Iterator<Item = Range<usize>> {
    let max = config.max_chunk_size;
    let stride = config.stride();
    let mut next_start: Option<usize> = (len > 0).then_some(0);

    std::iter::from_fn(move || {
        let start = next_start?;
        let end = start.saturating_add(max).min(len);
        next_start = (end < len).then(|| start.saturating_add(stride));
        Some(start..end)
    })
}
