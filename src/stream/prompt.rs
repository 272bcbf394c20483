//! Grounding prompt for the answer generator

use crate::retrieval::{format_history, EvidenceSet, Query};

pub const GROUNDED_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
using only the provided context. Cite the passages you rely on by their number, like [1]. \
If the context does not contain the answer, say that you do not know.";

const NO_EVIDENCE_NOTE: &str = "No grounding documents are available for this question. \
Answer from general knowledge only if you are confident, say clearly that no sources were found, \
and do not include any citations.";

/// Build the answer prompt: numbered evidence chunks, recent history and the
/// question
pub fn build_grounding_prompt(
    query: &Query,
    evidence: Option<&EvidenceSet>,
    history_window: usize,
    max_chunk_chars: usize,
) -> String {
    let mut prompt = String::new();

    match evidence.filter(|e| !e.is_empty()) {
        Some(evidence) => {
            prompt.push_str("Context:\n");
            for (i, candidate) in evidence.candidates().iter().enumerate() {
                prompt.push_str(&format!(
                    "[{}] {}\n{}\n\n",
                    i + 1,
                    candidate.doc_id,
                    truncate_chars(&candidate.text, max_chunk_chars)
                ));
            }
            prompt.push_str(
                "Answer using the context above and cite passage numbers for every claim.\n\n",
            );
        }
        None => {
            prompt.push_str(NO_EVIDENCE_NOTE);
            prompt.push_str("\n\n");
        }
    }

    let history = query.recent_history(history_window);
    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(&format_history(history));
        prompt.push_str("\n\n");
    }

    prompt.push_str("Question: ");
    prompt.push_str(query.text());
    prompt
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
