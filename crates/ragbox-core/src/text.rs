//! Text normalization.
//!
//! Every extractor output passes through [`normalize`] before gating and
//! chunking, so downstream components only ever see LF line endings, single
//! spaces, and at most one blank line between paragraphs.

/// Canonicalize whitespace, line endings, and control characters.
///
/// - removes NUL bytes
/// - converts CRLF and lone CR to LF
/// - collapses runs of tabs/spaces to a single space
/// - collapses three or more consecutive newlines to exactly two
/// - trims surrounding whitespace
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    let mut newline_run = 0usize;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        let c = match c {
            '\0' => continue,
            '\r' => {
                // CRLF counts as one newline
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                '\n'
            }
            other => other,
        };

        match c {
            '\n' => {
                pending_space = false;
                newline_run += 1;
                if newline_run <= 2 {
                    out.push('\n');
                }
            }
            ' ' | '\t' => {
                pending_space = true;
            }
            other => {
                if pending_space && !out.is_empty() && !out.ends_with('\n') {
                    out.push(' ');
                }
                pending_space = false;
                newline_run = 0;
                out.push(other);
            }
        }
    }

    out.trim_matches(|c: char| c.is_whitespace()).to_string()
}

/// Collapse a line to its comparison key: lowercase, single-spaced, trimmed.
///
/// Shared by the header/footer denoiser and the repetitiveness gate so both
/// agree on what counts as "the same line".
pub fn collapse_line(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
