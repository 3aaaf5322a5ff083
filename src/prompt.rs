//! Prompt assembly for grounded generation.
//!
//! Builds the generation prompt from retrieved fragments under a fixed
//! character budget. Fragments are taken best-score-first and included
//! whole or not at all — truncating mid-fragment would hand the model a
//! sentence fragment to cite. The same fragments and budget always produce
//! a byte-identical prompt.

use crate::models::ScoredChunk;

/// A prompt plus exactly the fragments that made it in. Citations must be
/// derived from `included`, never from the wider retrieval result.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub text: String,
    pub included: Vec<ScoredChunk>,
}

const INSTRUCTIONS: &str = "Answer the question using only the numbered context fragments below. \
Cite fragments by their number, like [1]. If the fragments do not contain \
the answer, say so.";

/// Assemble a grounded prompt from ranked fragments.
///
/// `context_budget_chars` bounds the total fragment text included (the
/// instruction scaffolding is not counted). A fragment that does not fit
/// whole is skipped and later, smaller fragments may still be included.
pub fn assemble(
    query: &str,
    fragments: &[ScoredChunk],
    context_budget_chars: usize,
) -> AssembledPrompt {
    let mut included: Vec<ScoredChunk> = Vec::new();
    let mut used = 0usize;

    for fragment in fragments {
        let cost = fragment.text.len();
        if used + cost > context_budget_chars {
            continue;
        }
        used += cost;
        included.push(fragment.clone());
    }

    let mut text = String::new();
    text.push_str(INSTRUCTIONS);
    text.push_str("\n\nContext:\n");
    for (i, fragment) in included.iter().enumerate() {
        text.push_str(&format!(
            "[{}] {}#{}: {}\n",
            i + 1,
            fragment.source_key,
            fragment.chunk_index,
            fragment.text
        ));
    }
    text.push_str(&format!("\nQuestion: {query}\n\nAnswer:"));

    AssembledPrompt { text, included }
}

/// Prompt used by the `ungrounded` no-context policy: the bare question,
/// with no fabricated context section.
pub fn assemble_ungrounded(query: &str) -> String {
    format!("Question: {query}\n\nAnswer:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(index: i64, score: f32, text: &str) -> ScoredChunk {
        ScoredChunk {
            document_id: "d1".to_string(),
            source_key: "doc.md".to_string(),
            chunk_index: index,
            score,
            text: text.to_string(),
            section: None,
        }
    }

    #[test]
    fn test_fragments_numbered_and_cited() {
        let fragments = vec![fragment(0, 0.9, "Alpha."), fragment(3, 0.8, "Beta.")];
        let prompt = assemble("what?", &fragments, 1000);

        assert!(prompt.text.contains("[1] doc.md#0: Alpha."));
        assert!(prompt.text.contains("[2] doc.md#3: Beta."));
        assert!(prompt.text.ends_with("Question: what?\n\nAnswer:"));
        assert_eq!(prompt.included.len(), 2);
    }

    #[test]
    fn test_budget_skips_whole_fragments() {
        let fragments = vec![
            fragment(0, 0.9, &"a".repeat(50)),
            fragment(1, 0.8, &"b".repeat(80)), // would overflow, skipped
            fragment(2, 0.7, &"c".repeat(40)), // still fits
        ];
        let prompt = assemble("q", &fragments, 100);

        assert_eq!(prompt.included.len(), 2);
        assert_eq!(prompt.included[0].chunk_index, 0);
        assert_eq!(prompt.included[1].chunk_index, 2);
        assert!(!prompt.text.contains(&"b".repeat(80)));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let fragments = vec![fragment(0, 0.9, "Alpha."), fragment(1, 0.8, "Beta.")];
        let a = assemble("same question", &fragments, 500);
        let b = assemble("same question", &fragments, 500);
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn test_empty_fragments_still_well_formed() {
        let prompt = assemble("q", &[], 100);
        assert!(prompt.included.is_empty());
        assert!(prompt.text.contains("Question: q"));
    }

    #[test]
    fn test_ungrounded_has_no_context_section() {
        let text = assemble_ungrounded("what?");
        assert!(!text.contains("Context:"));
        assert!(text.contains("Question: what?"));
    }
}
