//! Questions grounded in indexed documents.

use colloquy_context::retrieval::{DEFAULT_KNOWLEDGE_LIMIT, DEFAULT_TOP_K, knowledge_for_question};
use colloquy_context::{DocumentIndex, IndexError, TokenCounter};

const KNOWLEDGE_PREAMBLE: &str =
    "Answer using the document excerpts below where they are relevant.";

/// Rewrites `question` to carry the best-matching excerpts from `index`.
///
/// `question_embedding` must come from the same embedding model the index was
/// built with. When nothing fits the knowledge budget the question is
/// returned unchanged. Pass the result to [`ConversationSession::ask`]; the
/// excerpts then count against the context window like any other question
/// text.
///
/// [`ConversationSession::ask`]: crate::ConversationSession::ask
pub async fn ground_question<X>(
    index: &X,
    counter: &TokenCounter,
    question_embedding: &[f32],
    question: &str,
) -> Result<String, IndexError>
where
    X: DocumentIndex + ?Sized,
{
    let knowledge = knowledge_for_question(
        index,
        question_embedding,
        DEFAULT_TOP_K,
        DEFAULT_KNOWLEDGE_LIMIT,
        counter,
    )
    .await?;

    if knowledge.is_empty() {
        tracing::debug!("No document knowledge for question");
        return Ok(question.to_string());
    }

    tracing::debug!(knowledge_len = knowledge.len(), "Grounded question in documents");
    Ok(format!("{KNOWLEDGE_PREAMBLE}\n{knowledge}\nQuestion: {question}"))
}
