use crate::index::ChunkIndex;
use crate::traits::LanguageModel;
use crate::{ModelError, RetrievedChunk, SearchError};
use tracing::{info, warn};

pub const DEFAULT_TOP_K: usize = 3;

pub const NO_RELEVANT_CONTENT: &str = "No relevant chunks found for your query.";

/// Fills the fixed instruction template with the ranked chunks, joined by a
/// blank line, and the question.
pub fn build_prompt(query: &str, chunks: &[RetrievedChunk]) -> String {
    let context = chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a helpful AI assistant. Answer the user's question based ONLY on the context provided below.\n\
         If the context does not contain the answer, state that the information is not available.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {query}\n"
    )
}

#[derive(Debug)]
pub enum AnswerOutcome {
    Generated(String),
    /// Retrieval found nothing; the model was not called.
    NoRelevantContent,
    ModelFailed(ModelError),
}

#[derive(Debug)]
pub struct Answer {
    pub query: String,
    pub outcome: AnswerOutcome,
    /// The ranked chunks the answer was grounded on.
    pub context: Vec<RetrievedChunk>,
}

impl Answer {
    pub fn generated_text(&self) -> Option<&str> {
        match &self.outcome {
            AnswerOutcome::Generated(text) => Some(text),
            _ => None,
        }
    }

    /// User-facing rendering of the outcome.
    pub fn display_text(&self) -> String {
        match &self.outcome {
            AnswerOutcome::Generated(text) => text.clone(),
            AnswerOutcome::NoRelevantContent => NO_RELEVANT_CONTENT.to_string(),
            AnswerOutcome::ModelFailed(error) => format!("Error: {error}"),
        }
    }
}

pub struct RetrievalAnswerer<L>
where
    L: LanguageModel,
{
    index: ChunkIndex,
    model: L,
    top_k: usize,
}

impl<L> RetrievalAnswerer<L>
where
    L: LanguageModel,
{
    pub fn new(index: ChunkIndex, model: L) -> Self {
        Self {
            index,
            model,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    pub async fn answer(&self, query: &str) -> Result<Answer, SearchError> {
        self.answer_with_top_k(query, self.top_k).await
    }

    /// Retrieval failures are returned as errors; model failures are part of
    /// the returned [`Answer`].
    pub async fn answer_with_top_k(&self, query: &str, top_k: usize) -> Result<Answer, SearchError> {
        let context = self.index.search(query, top_k).await?;

        if context.is_empty() {
            info!(query = %query, "no relevant chunks, skipping model call");
            return Ok(Answer {
                query: query.to_string(),
                outcome: AnswerOutcome::NoRelevantContent,
                context,
            });
        }

        let prompt = build_prompt(query, &context);
        let outcome = match self.model.complete(&prompt).await {
            Ok(text) => AnswerOutcome::Generated(text),
            Err(error) => {
                warn!(model = self.model.model_id(), %error, "language model call failed");
                AnswerOutcome::ModelFailed(error)
            }
        };

        Ok(Answer {
            query: query.to_string(),
            outcome,
            context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CharacterNgramEmbedder, ChunkMetadata, InMemoryVectorIndex};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingModel {
        prompts: Arc<Mutex<Vec<String>>>,
        fail_with_status: Option<u16>,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        fn model_id(&self) -> &str {
            "recording"
        }

        async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.fail_with_status {
                Some(status) => Err(ModelError::Status {
                    provider: "fake".to_string(),
                    status,
                    body: "quota exceeded".to_string(),
                }),
                None => Ok("Cats are mammals.".to_string()),
            }
        }
    }

    fn empty_index() -> ChunkIndex {
        ChunkIndex::new(
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(CharacterNgramEmbedder::default()),
        )
    }

    #[tokio::test]
    async fn empty_index_signals_no_content_without_calling_the_model() {
        let model = RecordingModel::default();
        let answerer = RetrievalAnswerer::new(empty_index(), model.clone());

        let answer = answerer.answer("What are cats?").await.unwrap();

        assert!(matches!(answer.outcome, AnswerOutcome::NoRelevantContent));
        assert!(answer.context.is_empty());
        assert!(model.prompts.lock().unwrap().is_empty());
        assert_eq!(answer.display_text(), NO_RELEVANT_CONTENT);
    }

    #[tokio::test]
    async fn prompt_contains_exactly_the_retrieved_chunk() {
        let index = empty_index();
        index
            .add_chunks(&["Cats are mammals.".to_string()], None, None)
            .await
            .unwrap();
        let model = RecordingModel::default();
        let answerer = RetrievalAnswerer::new(index, model.clone()).with_top_k(1);

        let answer = answerer.answer("What are cats?").await.unwrap();

        assert_eq!(answer.generated_text(), Some("Cats are mammals."));
        assert_eq!(answer.context.len(), 1);
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Context:\nCats are mammals.\n\nQuestion: What are cats?"));
    }

    #[tokio::test]
    async fn model_failure_becomes_an_inspectable_outcome() {
        let index = empty_index();
        index
            .add_chunks(&["Cats are mammals.".to_string()], None, None)
            .await
            .unwrap();
        let model = RecordingModel {
            fail_with_status: Some(429),
            ..RecordingModel::default()
        };
        let answerer = RetrievalAnswerer::new(index, model);

        let answer = answerer.answer("What are cats?").await.unwrap();

        match &answer.outcome {
            AnswerOutcome::ModelFailed(error) => assert!(error.is_quota_exceeded()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(answer.display_text().starts_with("Error: "));
        assert_eq!(answer.context.len(), 1);
    }

    #[test]
    fn context_chunks_are_joined_in_rank_order() {
        let chunk = |text: &str, score: f32| RetrievedChunk {
            id: text.to_string(),
            text: text.to_string(),
            score,
            metadata: ChunkMetadata::default(),
        };

        let prompt = build_prompt("q?", &[chunk("first", 0.9), chunk("second", 0.5)]);
        assert!(prompt.contains("Context:\nfirst\n\nsecond\n\nQuestion: q?"));
        assert!(prompt.contains("based ONLY on the context"));
    }
}
