//! Deterministic, size-bounded context block assembly.

use ragbox_core::RetrievalHit;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

const HEADER: &str = "DOCUMENT CONTEXT (excerpts):\n\
Use excerpts for factual claims. If missing, say \"Not found in the document context.\"\n\
When citing, mention: [DocName §ChunkNumber].\n";

/// A truncated trailing excerpt must keep at least this many characters to
/// be worth including.
const MIN_TRUNCATED_CHARS: usize = 80;

/// Build the context block injected ahead of the user's question.
///
/// Layout:
///
/// ```text
/// DOCUMENT CONTEXT (excerpts):
/// Use excerpts for factual claims. ...
///
/// ### <DocName>
///
/// [<DocName> §<chunkIndex+1>] <chunk text>
/// ```
///
/// Hits are deduplicated by `(doc_id, chunk_id, chunk_index)`, grouped by
/// document, ordered by descending score within a group, and capped at
/// `per_doc_cap` excerpts per document. Assembly stops once `max_chars`
/// would be exceeded; a final overflowing excerpt is admitted as a
/// truncated prefix of at least 80 characters followed by `…`.
///
/// Returns `None` when no excerpt fits the budget.
pub fn build_context_block(
    hits: &[RetrievalHit],
    max_chars: usize,
    per_doc_cap: usize,
) -> Option<String> {
    if hits.is_empty() {
        return None;
    }

    // Dedupe, preserving first-seen order
    let mut seen = HashSet::new();
    let deduped: Vec<&RetrievalHit> = hits
        .iter()
        .filter(|h| seen.insert((h.doc_id, h.chunk_id.clone(), h.chunk_index)))
        .collect();

    // Group by document, in first-appearance order
    let mut doc_order: Vec<Uuid> = Vec::new();
    let mut groups: HashMap<Uuid, Vec<&RetrievalHit>> = HashMap::new();
    for hit in deduped {
        if !groups.contains_key(&hit.doc_id) {
            doc_order.push(hit.doc_id);
        }
        groups.entry(hit.doc_id).or_default().push(hit);
    }

    let header_chars = HEADER.chars().count();
    if header_chars >= max_chars {
        return None;
    }

    let mut out = String::from(HEADER);
    let mut used = header_chars;
    let mut wrote_excerpt = false;

    'docs: for doc_id in doc_order {
        let mut group = groups.remove(&doc_id).unwrap_or_default();
        group.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        group.truncate(per_doc_cap);

        let name = match group.first() {
            Some(first) => first.doc_name.clone(),
            None => continue,
        };
        let section = format!("\n### {name}\n");
        let section_chars = section.chars().count();
        let mut section_written = false;

        for hit in group {
            let prefix = format!("\n[{} §{}] ", hit.doc_name, hit.chunk_index + 1);
            let prefix_chars = prefix.chars().count();
            let text_chars = hit.text.chars().count();
            let pending_section = if section_written { 0 } else { section_chars };

            // +1 for the trailing newline of the excerpt line
            let full_cost = pending_section + prefix_chars + text_chars + 1;
            if used + full_cost <= max_chars {
                if !section_written {
                    out.push_str(&section);
                    used += section_chars;
                    section_written = true;
                }
                out.push_str(&prefix);
                out.push_str(&hit.text);
                out.push('\n');
                used += prefix_chars + text_chars + 1;
                wrote_excerpt = true;
                continue;
            }

            // Overflow: admit a truncated prefix when enough room remains,
            // then stop assembling entirely
            let room = max_chars
                .saturating_sub(used + pending_section + prefix_chars + 1);
            if room >= MIN_TRUNCATED_CHARS {
                if !section_written {
                    out.push_str(&section);
                }
                out.push_str(&prefix);
                out.extend(hit.text.chars().take(room));
                out.push('…');
                out.push('\n');
                wrote_excerpt = true;
            }
            break 'docs;
        }
    }

    if wrote_excerpt {
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc: Uuid, name: &str, index: u32, score: f32, text: &str) -> RetrievalHit {
        RetrievalHit {
            doc_id: doc,
            doc_name: name.to_string(),
            chunk_id: format!("{doc}-{index}"),
            chunk_index: index,
            text: text.to_string(),
            score,
        }
    }

    #[test]
    fn test_empty_hits() {
        assert!(build_context_block(&[], 2400, 6).is_none());
    }

    #[test]
    fn test_basic_layout() {
        let doc = Uuid::new_v4();
        let hits = vec![
            hit(doc, "report.pdf", 0, 0.9, "The title is Annual Report."),
            hit(doc, "report.pdf", 3, 0.5, "Revenue grew twelve percent."),
        ];
        let block = build_context_block(&hits, 2400, 6).unwrap();

        assert!(block.starts_with("DOCUMENT CONTEXT (excerpts):\n"));
        assert!(block.contains("### report.pdf"));
        assert!(block.contains("[report.pdf §1] The title is Annual Report."));
        assert!(block.contains("[report.pdf §4] Revenue grew twelve percent."));
        // Higher score first within the group
        assert!(block.find("§1").unwrap() < block.find("§4").unwrap());
    }

    #[test]
    fn test_group_orders_by_score() {
        let doc = Uuid::new_v4();
        let hits = vec![
            hit(doc, "a.txt", 0, 0.2, "low"),
            hit(doc, "a.txt", 1, 0.8, "high"),
        ];
        let block = build_context_block(&hits, 2400, 6).unwrap();
        assert!(block.find("§2").unwrap() < block.find("§1").unwrap());
    }

    #[test]
    fn test_dedupe() {
        let doc = Uuid::new_v4();
        let a = hit(doc, "a.txt", 0, 0.9, "same chunk");
        let hits = vec![a.clone(), a.clone(), a];
        let block = build_context_block(&hits, 2400, 6).unwrap();
        assert_eq!(block.matches("same chunk").count(), 1);
    }

    #[test]
    fn test_per_doc_cap() {
        let doc = Uuid::new_v4();
        let hits: Vec<RetrievalHit> = (0..10)
            .map(|i| hit(doc, "a.txt", i, 1.0 - i as f32 * 0.05, &format!("excerpt {i}")))
            .collect();
        let block = build_context_block(&hits, 100_000, 6).unwrap();
        assert_eq!(block.matches("[a.txt §").count(), 6);
    }

    #[test]
    fn test_groups_by_doc_name() {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let hits = vec![
            hit(doc_a, "first.pdf", 0, 0.9, "from the first document"),
            hit(doc_b, "second.pdf", 0, 0.8, "from the second document"),
            hit(doc_a, "first.pdf", 1, 0.7, "more from the first"),
        ];
        let block = build_context_block(&hits, 2400, 6).unwrap();

        let first_pos = block.find("### first.pdf").unwrap();
        let second_pos = block.find("### second.pdf").unwrap();
        assert!(first_pos < second_pos);
        // Both of first.pdf's excerpts sit in its section, before second.pdf
        assert!(block.find("more from the first").unwrap() < second_pos);
    }

    #[test]
    fn test_budget_bound() {
        let doc = Uuid::new_v4();
        let text = "word ".repeat(200);
        let hits: Vec<RetrievalHit> = (0..20)
            .map(|i| hit(doc, "big.txt", i, 0.9, &text))
            .collect();

        for max_chars in [400, 700, 1200, 2400, 5000] {
            if let Some(block) = build_context_block(&hits, max_chars, 6) {
                let len = block.chars().count();
                assert!(
                    len <= max_chars + 4,
                    "{len} chars exceeds budget {max_chars}"
                );
            }
        }
    }

    #[test]
    fn test_truncated_tail_excerpt() {
        let doc = Uuid::new_v4();
        let long = "alpha beta gamma ".repeat(100);
        let hits = vec![
            hit(doc, "a.txt", 0, 0.9, "short first excerpt"),
            hit(doc, "a.txt", 1, 0.8, &long),
        ];
        let header_plus_first = 400;
        let block = build_context_block(&hits, header_plus_first, 6).unwrap();

        assert!(block.contains("short first excerpt"));
        assert!(block.contains('…'), "expected a truncation marker");
        // The truncated piece keeps at least the minimum prefix
        let truncated = block.split("§2] ").nth(1).unwrap();
        assert!(truncated.trim_end_matches(['…', '\n']).chars().count() >= 80);
    }

    #[test]
    fn test_tiny_budget_returns_none() {
        let doc = Uuid::new_v4();
        let hits = vec![hit(doc, "a.txt", 0, 0.9, &"x".repeat(500))];
        assert!(build_context_block(&hits, 50, 6).is_none());
    }

    #[test]
    fn test_deterministic() {
        let doc = Uuid::new_v4();
        let hits: Vec<RetrievalHit> = (0..8)
            .map(|i| hit(doc, "a.txt", i, 0.9 - i as f32 * 0.1, &format!("text {i}")))
            .collect();
        let a = build_context_block(&hits, 2400, 6).unwrap();
        let b = build_context_block(&hits, 2400, 6).unwrap();
        assert_eq!(a, b);
    }
}
