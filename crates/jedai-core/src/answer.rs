//! Grounded answer synthesis.
//!
//! [`AnswerSynthesizer::generate_answer`] has exactly two outcomes that
//! produce an [`Answer`]:
//!
//! | Retrieved chunks | Model call | Result |
//! |------------------|------------|--------|
//! | non-empty | succeeds | grounded, cites the referenced excerpts |
//! | empty | succeeds | general knowledge, no citations |
//! | any | fails or times out | general knowledge, error-flagged content |
//!
//! Cancellation before or during the model call returns
//! [`CoreError::Cancelled`] instead of an answer.
//!
//! [`AnswerSynthesizer::generate_answer_streaming`] follows the same table
//! but hands completion text to a callback as the model produces it. The
//! returned [`Answer`] is still the final word: after a mid-stream failure
//! it is the flagged fallback, not the partial text already delivered.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::models::{Answer, IdeContext, RetrievedChunk};
use crate::prompt::{referenced_excerpts, Prompt, PromptBuilder};

/// Appended to answers that could not use course material.
pub const GENERAL_KNOWLEDGE_NOTICE: &str =
    "Response is based on general knowledge; no specific course material is referenced.";

/// Completion text in arrival order. An `Err` item ends the completion.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Callback receiving each piece of streamed completion text.
pub type DeltaSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// A text-completion endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Implementations report transport, quota and response problems as
    /// [`CoreError::ModelInvocation`].
    async fn complete(&self, prompt: &Prompt) -> Result<String>;

    /// Stream the completion as it is generated.
    ///
    /// The default yields the whole [`complete`](LanguageModel::complete)
    /// result as a single piece.
    async fn complete_stream(&self, prompt: &Prompt) -> Result<CompletionStream> {
        let text = self.complete(prompt).await?;
        Ok(Box::pin(tokio_stream::once(Ok(text))))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesizerConfig {
    /// Upper bound on one model call.
    pub timeout: Duration,
    /// Character budget for excerpt text in the prompt.
    pub max_context_chars: usize,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_context_chars: 12_000,
        }
    }
}

pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    prompts: PromptBuilder,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, config: SynthesizerConfig) -> Self {
        Self {
            model,
            prompts: PromptBuilder::new(config.max_context_chars),
            timeout: config.timeout,
        }
    }

    /// Answer `question`, grounded in `chunks` when there are any.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Cancelled`] if `cancel` fires first.
    /// - [`CoreError::PostconditionViolated`] only on an internal bug.
    ///
    /// Model failures never surface as errors.
    pub async fn generate_answer(
        &self,
        question: &str,
        ide: Option<&IdeContext>,
        chunks: &[RetrievedChunk],
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        self.answer(question, ide, chunks, cancel, None).await
    }

    /// [`generate_answer`](Self::generate_answer), passing completion text
    /// to `on_delta` piece by piece as the model streams it.
    ///
    /// Pieces are untrimmed. When the model fails or times out part way,
    /// the returned answer is the flagged fallback and supersedes whatever
    /// `on_delta` has already seen. Cancellation stops delivery at once.
    pub async fn generate_answer_streaming(
        &self,
        question: &str,
        ide: Option<&IdeContext>,
        chunks: &[RetrievedChunk],
        cancel: &CancellationToken,
        on_delta: DeltaSink<'_>,
    ) -> Result<Answer> {
        self.answer(question, ide, chunks, cancel, Some(on_delta))
            .await
    }

    async fn answer(
        &self,
        question: &str,
        ide: Option<&IdeContext>,
        chunks: &[RetrievedChunk],
        cancel: &CancellationToken,
        on_delta: Option<DeltaSink<'_>>,
    ) -> Result<Answer> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        if chunks.is_empty() {
            let prompt = self.prompts.general(question, ide);
            return match self.invoke(&prompt, cancel, on_delta).await {
                Ok(text) => Ok(Answer::general_knowledge(text)),
                Err(CoreError::Cancelled) => Err(CoreError::Cancelled),
                Err(e) => Ok(self.degraded(&e)),
            };
        }

        let prompt = self.prompts.grounded(question, ide, chunks);
        match self.invoke(&prompt, cancel, on_delta).await {
            Ok(text) => {
                let citations = select_citations(&text, &chunks[..prompt.excerpts]);
                tracing::debug!(
                    model = self.model.name(),
                    offered = prompt.excerpts,
                    cited = citations.len(),
                    "grounded answer"
                );
                Answer::grounded(text, citations)
            }
            Err(CoreError::Cancelled) => Err(CoreError::Cancelled),
            Err(e) => Ok(self.degraded(&e)),
        }
    }

    async fn invoke(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
        on_delta: Option<DeltaSink<'_>>,
    ) -> Result<String> {
        let call = async {
            let Some(on_delta) = on_delta else {
                return self.model.complete(prompt).await;
            };
            let mut stream = self.model.complete_stream(prompt).await?;
            let mut text = String::new();
            while let Some(delta) = stream.next().await {
                let delta = delta?;
                on_delta(&delta);
                text.push_str(&delta);
            }
            Ok(text)
        };
        let call = tokio::time::timeout(self.timeout, call);
        let completion = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            outcome = call => outcome.map_err(|_| {
                CoreError::ModelInvocation(format!("no response within {}s", self.timeout.as_secs()))
            })?,
        };
        let text = match completion {
            Ok(text) => text,
            // A model reporting cancellation without our token firing is just a failure.
            Err(CoreError::Cancelled) => {
                return Err(CoreError::ModelInvocation("model call was cancelled".into()))
            }
            Err(e) => return Err(e),
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::ModelInvocation("empty completion".into()));
        }
        Ok(text.to_string())
    }

    fn degraded(&self, error: &CoreError) -> Answer {
        tracing::warn!(model = self.model.name(), error = %error, "falling back to general knowledge");
        Answer::general_knowledge(format!(
            "[model error: {}] {}",
            error, GENERAL_KNOWLEDGE_NOTICE
        ))
    }
}

/// Excerpts the completion refers to with `[n]`, or all offered excerpts
/// when it refers to none.
fn select_citations(text: &str, offered: &[RetrievedChunk]) -> Vec<RetrievedChunk> {
    let referenced = referenced_excerpts(text, offered.len());
    if referenced.is_empty() {
        return offered.to_vec();
    }
    referenced
        .into_iter()
        .map(|n| offered[n - 1].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, PageSpan};
    use std::sync::Mutex;

    /// Returns queued responses in order, recording every prompt it sees.
    struct ScriptedModel {
        responses: Mutex<Vec<Result<String>>>,
        delay: Duration,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                responses: Mutex::new(vec![Ok("late".into())]),
                delay,
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _prompt: &Prompt) -> Result<String> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(CoreError::ModelInvocation("script exhausted".into()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn chunk(doc: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: format!("{}-0", doc),
                document_id: doc.into(),
                chunk_index: 0,
                text: format!("{} text", doc),
                pages: PageSpan::Unknown,
                hash: String::new(),
            },
            score: 0.7,
            source: doc.into(),
        }
    }

    /// Streams queued pieces; optionally stays open afterwards.
    struct StreamingModel {
        pieces: Mutex<Vec<Result<String>>>,
        hold_open: bool,
    }

    impl StreamingModel {
        fn new(pieces: Vec<Result<String>>) -> Self {
            Self {
                pieces: Mutex::new(pieces),
                hold_open: false,
            }
        }
    }

    #[async_trait]
    impl LanguageModel for StreamingModel {
        fn name(&self) -> &str {
            "streaming"
        }

        async fn complete(&self, _prompt: &Prompt) -> Result<String> {
            Err(CoreError::ModelInvocation("streaming only".into()))
        }

        async fn complete_stream(&self, _prompt: &Prompt) -> Result<CompletionStream> {
            let pieces = std::mem::take(&mut *self.pieces.lock().unwrap());
            let head = tokio_stream::iter(pieces);
            if self.hold_open {
                Ok(Box::pin(head.chain(tokio_stream::pending())))
            } else {
                Ok(Box::pin(head))
            }
        }
    }

    fn synth(model: ScriptedModel) -> AnswerSynthesizer {
        AnswerSynthesizer::new(Arc::new(model), SynthesizerConfig::default())
    }

    #[tokio::test]
    async fn grounded_answer_cites_referenced_excerpts() {
        let s = synth(ScriptedModel::new(vec![Ok("Per [2], it halts.".into())]));
        let chunks = [chunk("a"), chunk("b")];
        let answer = s
            .generate_answer("q", None, &chunks, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!answer.is_general_knowledge());
        assert_eq!(answer.citations().len(), 1);
        assert_eq!(answer.citations()[0].document_id(), "b");
    }

    #[tokio::test]
    async fn grounded_answer_without_markers_cites_everything() {
        let s = synth(ScriptedModel::new(vec![Ok("  It halts.  ".into())]));
        let answer = s
            .generate_answer("q", None, &[chunk("a"), chunk("b")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer.content(), "It halts.");
        assert_eq!(answer.citations().len(), 2);
    }

    #[tokio::test]
    async fn empty_chunks_give_general_knowledge() {
        let s = synth(ScriptedModel::new(vec![Ok("General answer.".into())]));
        let answer = s
            .generate_answer("q", None, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(answer.is_general_knowledge());
        assert!(answer.citations().is_empty());
        assert_eq!(answer.content(), "General answer.");
    }

    #[tokio::test]
    async fn model_failure_degrades_with_flagged_content() {
        let s = synth(ScriptedModel::new(vec![Err(CoreError::ModelInvocation(
            "quota exceeded".into(),
        ))]));
        let answer = s
            .generate_answer("q", None, &[chunk("a")], &CancellationToken::new())
            .await
            .unwrap();
        assert!(answer.is_general_knowledge());
        assert!(answer.citations().is_empty());
        assert!(answer.content().starts_with("[model error:"));
        assert!(answer.content().contains("quota exceeded"));
        assert!(answer.content().ends_with(GENERAL_KNOWLEDGE_NOTICE));
    }

    #[tokio::test]
    async fn empty_completion_is_a_model_failure() {
        let s = synth(ScriptedModel::new(vec![Ok("   ".into())]));
        let answer = s
            .generate_answer("q", None, &[chunk("a")], &CancellationToken::new())
            .await
            .unwrap();
        assert!(answer.is_general_knowledge());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_degrades() {
        let s = AnswerSynthesizer::new(
            Arc::new(ScriptedModel::slow(Duration::from_secs(120))),
            SynthesizerConfig {
                timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );
        let answer = s
            .generate_answer("q", None, &[chunk("a")], &CancellationToken::new())
            .await
            .unwrap();
        assert!(answer.is_general_knowledge());
        assert!(answer.content().contains("no response within 5s"));
    }

    #[tokio::test]
    async fn streamed_pieces_arrive_in_order_and_ground_the_answer() {
        let s = AnswerSynthesizer::new(
            Arc::new(StreamingModel::new(vec![
                Ok("Per ".into()),
                Ok("[2], it ".into()),
                Ok("halts. ".into()),
            ])),
            SynthesizerConfig::default(),
        );
        let mut seen = Vec::new();
        let answer = s
            .generate_answer_streaming(
                "q",
                None,
                &[chunk("a"), chunk("b")],
                &CancellationToken::new(),
                &mut |piece: &str| seen.push(piece.to_string()),
            )
            .await
            .unwrap();
        assert_eq!(seen, vec!["Per ", "[2], it ", "halts. "]);
        assert_eq!(answer.content(), "Per [2], it halts.");
        assert!(!answer.is_general_knowledge());
        assert_eq!(answer.citations().len(), 1);
        assert_eq!(answer.citations()[0].document_id(), "b");
    }

    #[tokio::test]
    async fn failure_mid_stream_degrades() {
        let s = AnswerSynthesizer::new(
            Arc::new(StreamingModel::new(vec![
                Ok("Partial ".into()),
                Err(CoreError::ModelInvocation("connection reset".into())),
            ])),
            SynthesizerConfig::default(),
        );
        let mut seen = Vec::new();
        let answer = s
            .generate_answer_streaming(
                "q",
                None,
                &[chunk("a")],
                &CancellationToken::new(),
                &mut |piece: &str| seen.push(piece.to_string()),
            )
            .await
            .unwrap();
        assert_eq!(seen, vec!["Partial "]);
        assert!(answer.is_general_knowledge());
        assert!(answer.citations().is_empty());
        assert!(answer.content().starts_with("[model error:"));
        assert!(answer.content().contains("connection reset"));
    }

    #[tokio::test]
    async fn cancelled_mid_stream() {
        let s = AnswerSynthesizer::new(
            Arc::new(StreamingModel {
                pieces: Mutex::new(vec![Ok("Per [1]".into())]),
                hold_open: true,
            }),
            SynthesizerConfig::default(),
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        let mut seen = 0;
        let err = s
            .generate_answer_streaming("q", None, &[chunk("a")], &token, &mut |_: &str| {
                seen += 1;
                canceller.cancel();
            })
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Cancelled);
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn non_streaming_model_streams_one_piece() {
        let s = synth(ScriptedModel::new(vec![Ok("General answer.".into())]));
        let mut seen = Vec::new();
        let answer = s
            .generate_answer_streaming(
                "q",
                None,
                &[],
                &CancellationToken::new(),
                &mut |piece: &str| seen.push(piece.to_string()),
            )
            .await
            .unwrap();
        assert_eq!(seen, vec!["General answer."]);
        assert!(answer.is_general_knowledge());
    }

    #[tokio::test]
    async fn cancelled_before_call() {
        let s = synth(ScriptedModel::new(vec![Ok("x".into())]));
        let token = CancellationToken::new();
        token.cancel();
        let err = s
            .generate_answer("q", None, &[chunk("a")], &token)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_call() {
        let s = synth(ScriptedModel::slow(Duration::from_secs(30)));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let err = s
            .generate_answer("q", None, &[], &token)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Cancelled);
    }
}
