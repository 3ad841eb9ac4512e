//! Solution agent: one natural-language answer per question

use super::parser::Question;
use crate::retrieval::{ImageContext, TextContext};

/// System prompt for the solution agent
pub const SYSTEM_PROMPT: &str = "\
You answer form questions on behalf of a user. You receive one question in \
JSON form together with instructions and excerpts retrieved from the user's \
own documents. Ground your answer in that context; prefer session \
instructions, then personal instructions, then document context. Provide \
only the solution/answer as plain text. Do not include explanations unless \
necessary.";

/// Maximum option labels folded into the retrieval query
const MAX_QUERY_OPTIONS: usize = 10;

/// Maximum text excerpts shown in the prompt
const MAX_CONTEXT_EXCERPTS: usize = 5;

/// Maximum characters per excerpt
const MAX_EXCERPT_CHARS: usize = 500;

/// Placeholder used when the retrieval context is empty
pub const NO_CONTEXT_NOTE: &str = "No relevant context retrieved from documents.";

/// Compose a semantic retrieval query from a question's semantic half.
///
/// The retrieval context leads (section headers and categories retrieve
/// better than the bare prompt), followed by the question text and up to
/// ten option labels. Falls back to a fixed phrase when everything is
/// empty.
pub fn build_search_query(question: &Question) -> String {
    let mut phrases: Vec<String> = Vec::new();

    let mut push = |value: Option<&str>| {
        if let Some(text) = value {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                phrases.push(trimmed.to_string());
            }
        }
    };

    push(question.question_data.rag_context.as_deref());
    push(question.question_data.question.as_deref());
    for option in question
        .question_data
        .available_options
        .iter()
        .take(MAX_QUERY_OPTIONS)
    {
        push(Some(option));
    }

    let query = phrases.join(" ").trim().to_string();
    if query.is_empty() {
        "form question context".to_string()
    } else {
        query
    }
}

/// Truncate an excerpt at a char boundary
fn excerpt(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

/// Format the "Document Context" section of the solver prompt.
pub fn format_context_section(text_chunks: &[TextContext], image_chunks: &[ImageContext]) -> String {
    let mut lines: Vec<String> = Vec::new();

    if !text_chunks.is_empty() {
        lines.push(format!(
            "Retrieved {} relevant text sections from your documents:",
            text_chunks.len()
        ));
        for (i, chunk) in text_chunks.iter().take(MAX_CONTEXT_EXCERPTS).enumerate() {
            lines.push(format!(
                "{}. From {}:\n{}\n",
                i + 1,
                chunk.source,
                excerpt(&chunk.content, MAX_EXCERPT_CHARS)
            ));
        }
    }

    if !image_chunks.is_empty() {
        lines.push(format!(
            "Retrieved {} relevant image(s) from your documents (shown below).",
            image_chunks.len()
        ));
    }

    if lines.is_empty() {
        NO_CONTEXT_NOTE.to_string()
    } else {
        lines.join("\n")
    }
}

/// Assemble the full solver prompt text for one question.
///
/// Order matters: session instructions, personal instructions, document
/// context, then the semantic question slice as JSON.
pub fn build_solver_prompt(
    clipboard_text: Option<&str>,
    personal_instructions: Option<&str>,
    context_section: &str,
    question: &Question,
) -> String {
    let session = clipboard_text
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("No session instructions provided");
    let personal = personal_instructions
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("No personal instructions provided.");

    let question_json = serde_json::to_string_pretty(&question.solver_view())
        .unwrap_or_else(|_| "{}".to_string());

    format!(
        "Analyze the following form question and provide an appropriate solution/answer.\n\
         \n\
         Session Instructions (highest priority):\n\
         {session}\n\
         \n\
         Personal Instructions:\n\
         {personal}\n\
         \n\
         Document Context:\n\
         {context_section}\n\
         \n\
         ----------------------------------------\n\
         \n\
         Form Question:\n\
         ```json\n\
         {question_json}\n\
         ```\n\
         \n\
         Provide only the solution/answer as plain text. Do not include explanations unless necessary.\n"
    )
}
