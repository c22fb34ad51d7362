//! # ragbox-chunker
//!
//! Splits normalized text into overlapping, sentence-aware chunks sized for
//! embedding.
//!
//! The splitter prefers structure and degrades gracefully:
//!
//! 1. sentence boundaries, greedily packed up to the target size
//! 2. paragraph blocks when the text has no sentence structure; oversized
//!    paragraphs recurse into sentence packing
//! 3. word boundaries as the last resort
//!
//! An overlap pass then prepends each chunk with the tail of its
//! predecessor, marked with a `... ` continuation prefix, so neighboring
//! chunks share context across the cut.

use ragbox_core::text::normalize;
use tracing::debug;

/// Configuration for the chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk size in characters
    pub target_chars: usize,
    /// Maximum overlap carried from the previous chunk, in characters
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chars: 800,
            overlap_chars: 350,
        }
    }
}

/// One produced chunk.
///
/// `start_offset..end_offset` is the chunk's own slice of the normalized
/// input, before the overlap prefix was attached. `text` is the final
/// payload including the overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub index: u32,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Continuation marker prepended to overlapped chunks.
const CONTINUATION: &str = "... ";

/// Split text into overlapping chunks.
///
/// Returns an empty vector for empty input. Invariants:
///
/// - chunks cover the normalized input in order
/// - adjacent chunks share at most `overlap_chars` characters
/// - no chunk text exceeds `target_chars + overlap_chars`
pub fn chunk(input: &str, config: &ChunkerConfig) -> Vec<ChunkPiece> {
    let text = normalize(input);
    if text.is_empty() {
        return Vec::new();
    }

    let target = config.target_chars.max(1);
    if text.len() <= target {
        return vec![ChunkPiece {
            index: 0,
            text: text.clone(),
            start_offset: 0,
            end_offset: text.len(),
        }];
    }

    let sentence_cuts = sentence_boundaries(&text);
    let mut ranges = Vec::new();

    if !sentence_cuts.is_empty() {
        pack_range(&text, 0, text.len(), &sentence_cuts, target, None, &mut ranges);
    }

    if ranges.len() < 2 {
        let paragraph_cuts = paragraph_boundaries(&text);
        if !paragraph_cuts.is_empty() {
            ranges.clear();
            pack_range(
                &text,
                0,
                text.len(),
                &paragraph_cuts,
                target,
                Some(&sentence_cuts),
                &mut ranges,
            );
        }
    }

    if ranges.len() < 2 {
        ranges.clear();
        word_split_into(&text, 0, text.len(), target, &mut ranges);
    }

    debug!(
        "chunked {} chars into {} pieces (target {})",
        text.len(),
        ranges.len(),
        target
    );

    apply_overlap(&text, &ranges, config.overlap_chars)
}

// ============================================================================
// Boundary detection
// ============================================================================

/// Byte offsets where a new sentence starts.
///
/// A boundary is `.`, `!`, or `?` followed by whitespace and an uppercase or
/// opening-quote character.
fn sentence_boundaries(text: &str) -> Vec<usize> {
    let mut cuts = Vec::new();

    for (i, c) in text.char_indices() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut j = i + c.len_utf8();
        let mut saw_ws = false;
        while let Some(next) = text[j..].chars().next() {
            if next.is_whitespace() {
                saw_ws = true;
                j += next.len_utf8();
            } else {
                break;
            }
        }
        if !saw_ws || j >= text.len() {
            continue;
        }
        let next = text[j..].chars().next().unwrap();
        if next.is_uppercase() || matches!(next, '"' | '\'' | '(' | '\u{201C}' | '\u{2018}') {
            cuts.push(j);
        }
    }
    cuts
}

/// Byte offsets where a new paragraph starts (first char after a blank line).
fn paragraph_boundaries(text: &str) -> Vec<usize> {
    let mut cuts = Vec::new();
    let mut search_from = 0;
    while let Some(pos) = text[search_from..].find("\n\n") {
        let mut start = search_from + pos + 2;
        while start < text.len() && text.as_bytes()[start] == b'\n' {
            start += 1;
        }
        if start < text.len() {
            cuts.push(start);
        }
        search_from = start.max(search_from + pos + 1);
    }
    cuts
}

// ============================================================================
// Greedy packing
// ============================================================================

/// Greedily pack boundary-delimited units of `[range_start, range_end)` into
/// ranges of at most `target` bytes.
///
/// A unit that alone exceeds the target recurses into `fallback` boundaries
/// when given (paragraph -> sentence), otherwise it is split at word
/// boundaries.
fn pack_range(
    text: &str,
    range_start: usize,
    range_end: usize,
    boundaries: &[usize],
    target: usize,
    fallback: Option<&[usize]>,
    out: &mut Vec<(usize, usize)>,
) {
    let mut start = range_start;
    let mut bi = boundaries.partition_point(|&b| b <= range_start);

    while range_end - start > target {
        while bi < boundaries.len() && boundaries[bi] <= start {
            bi += 1;
        }

        // Furthest boundary still within the target window
        let mut last_fit = None;
        let mut j = bi;
        while j < boundaries.len() && boundaries[j] < range_end && boundaries[j] - start <= target {
            last_fit = Some(boundaries[j]);
            j += 1;
        }

        match last_fit {
            Some(cut) => {
                out.push((start, cut));
                start = cut;
                bi = j;
            }
            None => {
                // Single oversized unit
                let unit_end = boundaries
                    .get(j)
                    .copied()
                    .filter(|&b| b < range_end)
                    .unwrap_or(range_end);
                match fallback {
                    Some(inner) if inner.iter().any(|&b| b > start && b < unit_end) => {
                        pack_range(text, start, unit_end, inner, target, None, out);
                    }
                    _ => word_split_into(text, start, unit_end, target, out),
                }
                start = unit_end;
                bi = j;
            }
        }
    }

    if start < range_end {
        out.push((start, range_end));
    }
}

/// Split `[start, end)` at word boundaries into ranges of at most `target`
/// bytes, hard-cutting runs with no whitespace at a char boundary.
fn word_split_into(
    text: &str,
    mut start: usize,
    end: usize,
    target: usize,
    out: &mut Vec<(usize, usize)>,
) {
    while end - start > target {
        let window_end = char_floor(text, start + target);
        let cut = text[start..window_end]
            .rfind(|c: char| c.is_whitespace())
            .map(|p| start + p)
            .filter(|&c| c > start);

        match cut {
            Some(c) => {
                out.push((start, c));
                let ws = text[c..].chars().next().map_or(1, char::len_utf8);
                start = c + ws;
            }
            None => {
                let c = if window_end > start {
                    window_end
                } else {
                    char_ceil(text, start + 1)
                };
                out.push((start, c));
                start = c;
            }
        }
    }
    if start < end {
        out.push((start, end));
    }
}

/// Largest char boundary at or below `idx`.
fn char_floor(text: &str, idx: usize) -> usize {
    let mut i = idx.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary at or above `idx`.
fn char_ceil(text: &str, idx: usize) -> usize {
    let mut i = idx.min(text.len());
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

// ============================================================================
// Overlap pass
// ============================================================================

fn apply_overlap(text: &str, ranges: &[(usize, usize)], overlap: usize) -> Vec<ChunkPiece> {
    let mut pieces = Vec::with_capacity(ranges.len());

    for (i, &(start, end)) in ranges.iter().enumerate() {
        let base = text[start..end].trim();
        let payload = if i == 0 || overlap == 0 {
            base.to_string()
        } else {
            let (prev_start, prev_end) = ranges[i - 1];
            let prev = text[prev_start..prev_end].trim();
            // Marker plus joining space count against the overlap budget
            match overlap_suffix(prev, overlap.saturating_sub(CONTINUATION.len() + 1)) {
                Some(suffix) => format!("{CONTINUATION}{suffix} {base}"),
                None => base.to_string(),
            }
        };

        pieces.push(ChunkPiece {
            index: i as u32,
            text: payload,
            start_offset: start,
            end_offset: end,
        });
    }
    pieces
}

/// Suffix of `prev` cut at the nearest word boundary within the last
/// `budget` bytes. `None` when nothing useful fits.
fn overlap_suffix(prev: &str, budget: usize) -> Option<&str> {
    if prev.is_empty() || budget == 0 {
        return None;
    }
    if prev.len() <= budget {
        return Some(prev);
    }
    let from = char_ceil(prev, prev.len() - budget);
    let tail = &prev[from..];
    match tail.find(|c: char| c.is_whitespace()) {
        Some(ws) => {
            let suffix = tail[ws..].trim_start();
            if suffix.is_empty() {
                None
            } else {
                Some(suffix)
            }
        }
        // No word boundary inside the window; skip the overlap rather than
        // splitting a word
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(target: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            target_chars: target,
            overlap_chars: overlap,
        }
    }

    fn sentences(n: usize) -> String {
        (0..n)
            .map(|i| format!("Sentence number {i} talks about topic {i}."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk("", &ChunkerConfig::default()).is_empty());
        assert!(chunk("   \n\n  ", &ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn test_short_input_single_chunk() {
        let pieces = chunk("Just a small note.", &ChunkerConfig::default());
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].index, 0);
        assert_eq!(pieces[0].text, "Just a small note.");
        assert_eq!(pieces[0].start_offset, 0);
    }

    #[test]
    fn test_sentence_boundaries() {
        let cuts = sentence_boundaries("One two. Three four! Five? \"Quoted.\"");
        assert_eq!(cuts.len(), 3);
        // Detection requires an uppercase or opening quote after the stop
        let cuts = sentence_boundaries("e.g. example. see below.");
        assert!(cuts.is_empty());
    }

    #[test]
    fn test_splits_at_sentences() {
        let text = sentences(20);
        let pieces = chunk(&text, &config(120, 0));
        assert!(pieces.len() > 1);
        // Every cut is at a sentence start
        for p in &pieces {
            assert!(
                p.text.starts_with("Sentence"),
                "unexpected chunk start: {:?}",
                p.text
            );
        }
    }

    #[test]
    fn test_indices_dense_and_ordered() {
        let text = sentences(30);
        let pieces = chunk(&text, &config(150, 40));
        for (i, p) in pieces.iter().enumerate() {
            assert_eq!(p.index as usize, i);
        }
        for pair in pieces.windows(2) {
            assert!(pair[0].end_offset <= pair[1].start_offset);
            assert!(pair[0].start_offset < pair[1].start_offset);
        }
    }

    #[test]
    fn test_coverage() {
        let text = sentences(40);
        let normalized = normalize(&text);
        let pieces = chunk(&text, &config(200, 80));

        let rebuilt = pieces
            .iter()
            .map(|p| normalized[p.start_offset..p.end_offset].trim())
            .collect::<Vec<_>>()
            .join(" ");

        let canon = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(canon(&rebuilt), canon(&normalized));
    }

    #[test]
    fn test_chunk_size_bound() {
        let text = sentences(60);
        let cfg = config(180, 60);
        for p in chunk(&text, &cfg) {
            assert!(
                p.text.len() <= cfg.target_chars + cfg.overlap_chars,
                "chunk of {} bytes exceeds bound",
                p.text.len()
            );
        }
    }

    #[test]
    fn test_overlap_marker_and_sharing() {
        let text = sentences(20);
        let pieces = chunk(&text, &config(150, 60));
        assert!(pieces.len() >= 2);
        assert!(!pieces[0].text.starts_with(CONTINUATION));
        for p in &pieces[1..] {
            assert!(p.text.starts_with(CONTINUATION), "missing marker: {:?}", p.text);
        }

        // The carried prefix really is the predecessor's tail
        let normalized = normalize(&text);
        let prev_base = normalized[pieces[0].start_offset..pieces[0].end_offset].trim();
        let base = normalized[pieces[1].start_offset..pieces[1].end_offset].trim();
        let carried = pieces[1]
            .text
            .strip_prefix(CONTINUATION)
            .unwrap()
            .strip_suffix(base)
            .unwrap()
            .trim_end();
        assert!(!carried.is_empty());
        assert!(prev_base.ends_with(carried), "{carried:?} not a tail of {prev_base:?}");
    }

    #[test]
    fn test_zero_overlap() {
        let text = sentences(20);
        for p in chunk(&text, &config(150, 0)) {
            assert!(!p.text.starts_with(CONTINUATION));
        }
    }

    #[test]
    fn test_paragraph_fallback() {
        // No sentence punctuation at all, but clear paragraph structure
        let text = (0..12)
            .map(|i| format!("heading {i}\nline one of block {i}\nline two of block {i}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let pieces = chunk(&text, &config(120, 0));
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.text.starts_with("heading"), "bad cut: {:?}", p.text);
        }
    }

    #[test]
    fn test_mixed_blocks_cut_cleanly() {
        // Prose blocks mixed with unpunctuated ones
        let big = sentences(12);
        let text = format!("intro block\n\n{big}\n\noutro block");
        let pieces = chunk(&text, &config(140, 0));
        assert!(pieces.len() > 2);
        for p in &pieces {
            let first = p.text.chars().next().unwrap();
            assert!(!first.is_whitespace());
        }
    }

    #[test]
    fn test_word_fallback() {
        // No sentences, no paragraphs: just a long run of words
        let text = "lorem ipsum dolor sit amet consectetur ".repeat(40);
        let cfg = config(100, 0);
        let pieces = chunk(&text, &cfg);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.text.len() <= cfg.target_chars);
            assert!(!p.text.starts_with(' '));
            assert!(!p.text.ends_with(' '));
        }
    }

    #[test]
    fn test_unbroken_run_hard_cut() {
        let text = "x".repeat(500);
        let pieces = chunk(&text, &config(100, 0));
        assert_eq!(pieces.len(), 5);
        for p in &pieces {
            assert!(p.text.len() <= 100);
        }
    }

    #[test]
    fn test_multibyte_safety() {
        let text = "Überraschung für alle! Straße größer während Frühjahr. ".repeat(30);
        let pieces = chunk(&text, &config(90, 30));
        assert!(pieces.len() > 1);
        // Reaching here without a panic is the point; also sanity-check bounds
        for p in &pieces {
            assert!(p.text.len() <= 90 + 30);
        }
    }

    #[test]
    fn test_single_long_sentence_word_split() {
        let words = "alpha beta gamma delta epsilon zeta ".repeat(20);
        let text = format!("{words}end.");
        let pieces = chunk(&text, &config(100, 0));
        assert!(pieces.len() > 1);
    }

    #[test]
    fn test_overlap_suffix_word_boundary() {
        assert_eq!(overlap_suffix("the quick brown fox", 9), Some("fox"));
        assert_eq!(overlap_suffix("tiny", 10), Some("tiny"));
        assert_eq!(overlap_suffix("", 10), None);
        assert_eq!(overlap_suffix("abcdefghij", 4), None);
        assert_eq!(overlap_suffix("anything", 0), None);
    }
}
