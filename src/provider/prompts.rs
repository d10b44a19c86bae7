//! Prompt templates shared by both providers.

pub const IMAGE_PROMPT: &str = "Describe this image in detail. Mention any visible text, \
the main subjects, the setting, and anything that would help someone find this image \
again with a text search.";

/// Prompt for summarizing a whole document or a single chunk.
pub fn summary_prompt(text: &str) -> String {
    format!(
        "Summarize the following content so the summary can be used for semantic search. \
Keep the key topics, names, and facts. Answer with the summary only.\n\n\
Content:\n{}",
        text
    )
}

/// Prompt for merging chunk summaries, labelled in source order.
pub fn final_summary_prompt(summaries: &[String]) -> String {
    let sections = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Section {}: {}", i + 1, s.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "The following are summaries of consecutive sections of one document. \
Combine them into a single coherent summary of the whole document for semantic search. \
Answer with the summary only.\n\n{}",
        sections
    )
}
