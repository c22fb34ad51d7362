//! Post-extraction quality gate.
//!
//! Extracted text is denoised (repeated short header/footer lines dropped)
//! and then gated on minimum length and line uniqueness, so junk documents
//! fail fast instead of polluting the index.

use ragbox_core::text::collapse_line;
use ragbox_core::ExtractError;
use std::collections::HashMap;
use tracing::debug;

/// A line must repeat at least this often to be considered boilerplate.
const DENOISE_MIN_REPEATS: usize = 3;
/// Only short lines qualify as boilerplate.
const DENOISE_MAX_LINE_LEN: usize = 60;
/// Denoising must keep at least `max(this, original / 4)` characters.
const DENOISE_MIN_KEEP: usize = 120;

/// Minimum character count after denoising.
const MIN_CHARS: usize = 350;
/// The repetitiveness check applies from this many non-blank lines.
const MIN_LINES_FOR_RATIO: usize = 10;
/// Minimum ratio of unique non-blank lines.
const MIN_UNIQUE_RATIO: f32 = 0.35;

/// Run the full gate: denoise, then reject short or repetitive text.
///
/// Returns the (possibly denoised) text on success.
pub fn apply(text: &str) -> Result<String, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    let text = denoise_repeated_lines(text);

    let chars = text.chars().count();
    if chars < MIN_CHARS {
        return Err(ExtractError::TooShort { chars });
    }

    let (lines, ratio) = unique_line_ratio(&text);
    if lines >= MIN_LINES_FOR_RATIO && ratio < MIN_UNIQUE_RATIO {
        return Err(ExtractError::TooRepetitive { ratio });
    }

    Ok(text)
}

/// Drop short lines that repeat across the document (page headers, footers,
/// watermark rows).
///
/// The filter is only applied when the result keeps at least
/// `max(120, original / 4)` characters; otherwise the original text wins.
pub fn denoise_repeated_lines(text: &str) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for line in text.lines() {
        let key = collapse_line(line);
        if key.is_empty() {
            continue;
        }
        *counts.entry(key).or_insert(0) += 1;
    }

    let filtered: Vec<&str> = text
        .lines()
        .filter(|line| {
            let key = collapse_line(line);
            if key.is_empty() || key.chars().count() > DENOISE_MAX_LINE_LEN {
                return true;
            }
            counts.get(&key).copied().unwrap_or(0) < DENOISE_MIN_REPEATS
        })
        .collect();
    let filtered = filtered.join("\n");

    let keep_floor = DENOISE_MIN_KEEP.max(text.chars().count() / 4);
    if filtered.chars().count() >= keep_floor {
        if filtered.len() < text.len() {
            debug!(
                "denoised {} -> {} chars",
                text.chars().count(),
                filtered.chars().count()
            );
        }
        filtered
    } else {
        text.to_string()
    }
}

/// Unique non-blank lines over total non-blank lines, compared
/// case-insensitively with collapsed whitespace.
pub fn unique_line_ratio(text: &str) -> (usize, f32) {
    let mut seen = std::collections::HashSet::new();
    let mut total = 0usize;
    for line in text.lines() {
        let key = collapse_line(line);
        if key.is_empty() {
            continue;
        }
        total += 1;
        seen.insert(key);
    }
    if total == 0 {
        return (0, 0.0);
    }
    (total, seen.len() as f32 / total as f32)
}
