//! Dashboard synthesis: the stateful document-rewrite step.
//!
//! The oracle receives the full current document, the new fact, and the
//! recall context, and returns the full replacement document. Section update
//! policy is data ([`DomainConfig`] rules), rendered into the prompt and then
//! enforced mechanically after the call: `Preserve` sections whose trigger
//! did not fire are copied back from the previous document, and
//! `AppendBounded` sections are trimmed to their caps. A failed or empty
//! synthesis never replaces the previous document.

use std::sync::Arc;

use crate::domains::{DomainConfig, MergeRule, CURRENT_READING_HEADING};
use crate::error::{Result, TroveError};
use crate::oracle::{strip_code_fences, GenerationOracle};
use crate::types::{Entry, Intent};

// ── Markdown section helpers ──────────────────────────────────────────────────

/// Extract the body of a `## `-level section (without its heading line).
/// The body runs until the next `#`-prefixed heading or end of document.
pub fn section_body(doc: &str, heading: &str) -> Option<String> {
    let marker = format!("## {heading}");
    let mut lines = doc.lines();
    lines.find(|line| line.trim_end() == marker)?;

    let body: Vec<&str> = lines.take_while(|line| !line.starts_with('#')).collect();
    Some(body.join("\n"))
}

/// Replace the body of one `## `-level section, leaving every other byte of
/// the document unchanged. Appends the section if it doesn't exist.
pub fn merge_section(doc: &str, heading: &str, new_body: &str) -> String {
    let marker = format!("## {heading}");
    let lines: Vec<&str> = doc.lines().collect();

    let Some(start) = lines.iter().position(|line| line.trim_end() == marker) else {
        let mut out = doc.trim_end().to_string();
        out.push_str(&format!("\n\n{marker}\n{}\n", new_body.trim_end()));
        return out;
    };

    let end = lines[start + 1..]
        .iter()
        .position(|line| line.starts_with('#'))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    let mut out: Vec<String> = lines[..=start].iter().map(|s| s.to_string()).collect();
    let trimmed = new_body.trim_matches('\n');
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    if end < lines.len() {
        out.push(String::new());
        out.extend(lines[end..].iter().map(|s| s.to_string()));
    }
    let mut result = out.join("\n");
    if doc.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Leading `- YYYY-MM-DD` date of a bullet line, if present.
fn bullet_date(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("- ")?;
    let candidate = rest.get(..10)?;
    let bytes = candidate.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| matches!(i, 4 | 7) || b.is_ascii_digit());
    shaped.then_some(candidate)
}

/// Trim a section's bullet list to its newest `cap` items.
///
/// Dated bullets (`- YYYY-MM-DD …`) are kept by greatest date, a bounded
/// FIFO by date, not by insertion count. Undated bullets are kept from the
/// tail, since new items are appended. Non-bullet lines pass through.
fn trim_bullets(body: &str, cap: usize) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let bullet_count = lines.iter().filter(|l| l.starts_with("- ")).count();
    if bullet_count <= cap {
        return body.to_string();
    }

    let dated = lines
        .iter()
        .filter(|l| l.starts_with("- "))
        .all(|l| bullet_date(l).is_some());

    let drop_count = bullet_count - cap;
    let mut drop_indices: Vec<usize> = Vec::with_capacity(drop_count);

    if dated {
        // Drop the oldest dates
        let mut bullets: Vec<(usize, &str)> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.starts_with("- "))
            .map(|(i, l)| (i, bullet_date(l).unwrap_or("")))
            .collect();
        bullets.sort_by(|a, b| a.1.cmp(b.1));
        drop_indices.extend(bullets.iter().take(drop_count).map(|(i, _)| *i));
    } else {
        // Newest items are appended, so drop from the head
        drop_indices.extend(
            lines
                .iter()
                .enumerate()
                .filter(|(_, l)| l.starts_with("- "))
                .map(|(i, _)| i)
                .take(drop_count),
        );
    }

    lines
        .iter()
        .enumerate()
        .filter(|(i, _)| !drop_indices.contains(i))
        .map(|(_, l)| *l)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Synthesizer ───────────────────────────────────────────────────────────────

const SYNTH_SYSTEM: &str = "\
You maintain one living markdown dashboard for a personal knowledge archive. \
You receive the full current document, optionally one new fact, and recall \
context from related saved entries. Respond with the complete replacement \
document and nothing else, with no commentary, no code fences. Reproduce every \
section you were not asked to update exactly as given. Never invent facts \
not present in the document, the new fact, or the context. When the new fact \
contradicts the document, record the contradiction instead of silently \
overwriting either side.";

const READING_SYSTEM: &str = "\
You maintain the \"Current Reading\" section of a reading-list dashboard. \
Given the section's current body and a new reading-progress note, respond \
with the replacement body for that section only, as a markdown bullet list, no \
heading, no commentary, no code fences. Keep books the note doesn't mention.";

const ANSWER_SYSTEM: &str = "\
You answer questions from a personal knowledge archive. Use only the \
provided context snippets as evidence. If the context is empty or does not \
answer the question, say plainly that nothing saved supports an answer. \
Respond with the answer text only.";

pub struct Synthesizer {
    oracle: Arc<dyn GenerationOracle>,
}

impl Synthesizer {
    pub fn new(oracle: Arc<dyn GenerationOracle>) -> Self {
        Self { oracle }
    }

    /// Full-document rewrite. `new_entry: None` is a refresh pass: polish
    /// formatting and tone without adding facts, using the context only to
    /// check existing claims.
    pub async fn synthesize(
        &self,
        current: &str,
        new_entry: Option<&Entry>,
        intent: Intent,
        context: &str,
        domain: &DomainConfig,
    ) -> Result<String> {
        let user = build_synthesis_prompt(current, new_entry, intent, context, domain);
        let response = self.oracle.generate(SYNTH_SYSTEM, &user).await?;

        let mut document = strip_code_fences(&response);
        if document.trim().is_empty() {
            return Err(TroveError::Synthesis {
                reason: "oracle returned an empty document".into(),
                entry_id: None,
            });
        }

        // Mechanical guarantees on top of oracle trust: carry preserved
        // sections through, then enforce bounded caps.
        for rule in &domain.rules {
            let fired = rule.trigger.fires(new_entry, intent);
            match rule.merge {
                MergeRule::Preserve if !fired => {
                    if let Some(previous) = section_body(current, &rule.heading) {
                        document = merge_section(&document, &rule.heading, &previous);
                    }
                }
                MergeRule::AppendBounded(cap) => {
                    if let Some(body) = section_body(&document, &rule.heading) {
                        let trimmed = trim_bullets(&body, cap);
                        if trimmed != body {
                            document = merge_section(&document, &rule.heading, &trimmed);
                        }
                    }
                }
                _ => {}
            }
        }

        tracing::debug!(
            domain = %domain.name,
            refresh = new_entry.is_none(),
            chars = document.len(),
            "dashboard synthesized"
        );
        Ok(document)
    }

    /// Targeted read-merge-write of the current-reading subsection. Leaves
    /// every other section of the document byte-identical.
    pub async fn update_reading_section(
        &self,
        current_doc: &str,
        entry: &Entry,
    ) -> Result<String> {
        let old_body = section_body(current_doc, CURRENT_READING_HEADING).unwrap_or_default();
        let user = format!(
            "Current section body:\n{old_body}\n\nNew reading note:\n{}",
            entry.content
        );
        let response = self.oracle.generate(READING_SYSTEM, &user).await?;

        let new_body = strip_code_fences(&response);
        if new_body.trim().is_empty() {
            return Err(TroveError::Synthesis {
                reason: "oracle returned an empty reading section".into(),
                entry_id: None,
            });
        }

        Ok(merge_section(current_doc, CURRENT_READING_HEADING, &new_body))
    }

    /// Answer synthesis for the read-only query path. Empty context is passed
    /// through explicitly as "no evidence", never treated as an error.
    pub async fn answer(&self, question: &str, context: &str) -> Result<String> {
        let user = if context.is_empty() {
            format!("Question:\n{question}\n\nContext: (none; nothing saved matches)")
        } else {
            format!("Question:\n{question}\n\nContext:\n{context}")
        };
        let response = self.oracle.generate(ANSWER_SYSTEM, &user).await?;

        let answer = strip_code_fences(&response);
        if answer.trim().is_empty() {
            return Err(TroveError::Synthesis {
                reason: "oracle returned an empty answer".into(),
                entry_id: None,
            });
        }
        Ok(answer)
    }
}

fn describe_rule(rule: &crate::domains::SectionRule, fired: bool) -> String {
    let policy = match rule.merge {
        MergeRule::AppendBounded(cap) => {
            format!("rolling bullet list, keep at most {cap} items, oldest fall off")
        }
        MergeRule::RewriteNarrative => "narrative prose, rewrite to absorb new material".into(),
        MergeRule::FactsOnly => "distilled facts only, no commentary".into(),
        MergeRule::AppendOnly => "append-only ledger, never remove or reword items".into(),
        MergeRule::Preserve => "reproduce exactly as given".into(),
    };
    let action = if fired {
        "update this pass"
    } else {
        "do NOT touch this pass"
    };
    format!("- \"## {}\": {policy} ({action})", rule.heading)
}

fn build_synthesis_prompt(
    current: &str,
    new_entry: Option<&Entry>,
    intent: Intent,
    context: &str,
    domain: &DomainConfig,
) -> String {
    let rules = domain
        .rules
        .iter()
        .map(|r| describe_rule(r, r.trigger.fires(new_entry, intent)))
        .collect::<Vec<_>>()
        .join("\n");

    let fact = match new_entry {
        Some(entry) => format!(
            "New fact (captured {}):\n{}",
            &entry.created_at[..10.min(entry.created_at.len())],
            entry.content
        ),
        None => "New fact: none. This is a refresh pass: polish wording and \
                 formatting only, add nothing, and use the context purely to \
                 fact-check existing claims."
            .into(),
    };

    let context_block = if context.is_empty() {
        "Recall context: (none)".to_string()
    } else {
        format!("Recall context:\n{context}")
    };

    format!(
        "Domain: {}\n\nSection rules:\n{rules}\n\n{fact}\n\n{context_block}\n\n\
         Current document:\n{current}",
        domain.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Reading List\n\n## Current Reading\n- Dune\n\n## Recommendations\n\nTry more sci-fi.\n\n## Finished\n- Hyperion\n";

    #[test]
    fn section_body_extracts_between_headings() {
        assert_eq!(section_body(DOC, "Current Reading").unwrap().trim(), "- Dune");
        assert_eq!(section_body(DOC, "Finished").unwrap().trim(), "- Hyperion");
        assert!(section_body(DOC, "Nope").is_none());
    }

    #[test]
    fn merge_section_replaces_only_target() {
        let merged = merge_section(DOC, "Current Reading", "- Dune\n- Piranesi");
        assert!(merged.contains("- Piranesi"));
        assert!(merged.contains("Try more sci-fi."));
        assert!(merged.contains("- Hyperion"));
        // Untouched sections keep their content
        assert_eq!(
            section_body(&merged, "Finished").unwrap().trim(),
            "- Hyperion"
        );
    }

    #[test]
    fn merge_section_appends_missing_section() {
        let merged = merge_section("# Doc\n", "Notes", "- first");
        assert!(merged.contains("## Notes"));
        assert!(merged.contains("- first"));
    }

    #[test]
    fn bullet_date_parses_iso_prefix() {
        assert_eq!(bullet_date("- 2026-08-27: ran 5k"), Some("2026-08-27"));
        assert!(bullet_date("- no date here").is_none());
        assert!(bullet_date("not a bullet").is_none());
    }

    #[test]
    fn trim_bullets_keeps_newest_dates() {
        let body = "- 2026-08-01: a\n- 2026-08-03: c\n- 2026-08-02: b";
        let trimmed = trim_bullets(body, 2);
        assert!(!trimmed.contains("2026-08-01"));
        assert!(trimmed.contains("2026-08-02"));
        assert!(trimmed.contains("2026-08-03"));
    }

    #[test]
    fn trim_bullets_undated_keeps_tail() {
        let body = "- one\n- two\n- three";
        let trimmed = trim_bullets(body, 2);
        assert_eq!(trimmed, "- two\n- three");
    }

    #[test]
    fn trim_bullets_under_cap_is_untouched() {
        let body = "intro line\n- one\n- two";
        assert_eq!(trim_bullets(body, 5), body);
    }

    #[test]
    fn trim_bullets_preserves_non_bullet_lines() {
        let body = "a note\n- 2026-08-01: a\n- 2026-08-02: b";
        let trimmed = trim_bullets(body, 1);
        assert!(trimmed.contains("a note"));
        assert!(trimmed.contains("2026-08-02"));
    }
}
