//! Streaming chat aggregation.
//!
//! A [`ChatConversation`] owns one provider dialogue and the transcript shown
//! to the user. Each send streams deltas into a placeholder model turn; only
//! one send may be in flight per conversation.

use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};

use crate::models::dialogue::{DialogueTurn, Transcript};
use crate::services::metrics;
use crate::services::providers::{ChatProvider, Dialogue, ProviderError, StreamChunk};

/// Replaces a model turn whose stream failed.
pub const APOLOGY_TEXT: &str =
    "I apologize, but I encountered an error connecting to the service. Please try again.";

/// Id of the greeting turn every conversation starts with.
pub const GREETING_ID: &str = "init";

pub const GREETING_TEXT: &str = "Welcome to Kalky Digital. I am your specialized AI assistant.

I can help you with information regarding our ecosystem:
• Kalky Interior (Interior Design)
• Kitzine (Modular Kitchens, Furniture & Lighting)
• Kalky Digital (Website, App Dev & Marketing)
• Kalky Infra (Construction & Real Estate)

How may I assist you today?";

pub const QUICK_ACTIONS: [&str; 4] = [
    "Tell me about Kalky Interior",
    "What services does Kitzine offer?",
    "How can Kalky Digital help my business?",
    "Construction services by Kalky Infra",
];

pub const SYSTEM_INSTRUCTION: &str = "You are Kalky GPT, the exclusive AI concierge for the Kalky Group.

Your core knowledge base and expertise covers the following Kalky Ecosystem entities:

1. **Kalky Interior (www.kalkyinterior.com)**:
   - Expertise: High-end Interior Design services.
   - Focus: Creating aesthetic and functional living spaces.

2. **Kitzine (www.kitzine.com)**:
   - Expertise: Premium Modular Kitchens, Wardrobes, Custom Furniture, Lighting solutions, and Electrical usage planning.
   - Focus: Modern utility and luxury for home interiors.

3. **Kalky Digital (www.kalkydigital.com)**:
   - Expertise: Comprehensive Software Solutions.
   - Services: Website Development, Mobile App Development, and Digital Marketing strategies.

4. **Kalky Infra (www.kalky.in)**:
   - Expertise: Construction and Real Estate.
   - Services: Home Construction, Office setup, Kitchen Interior execution, and Commercial Space development.
   - This is the core business.

Your Persona:
- Tone: Professional, sophisticated, polite, and helpful (like a high-end Mac/Apple concierge).
- You represent the brand \"Kalky Digital\".
- When asked about services, strictly refer to the relevant Kalky entity above.
- Be concise but informative.";

/// Progress notifications for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The user turn and the empty model placeholder were appended.
    Started { user: DialogueTurn, model_id: String },
    /// One text delta, in arrival order.
    Delta(String),
    /// The model turn is final.
    Finished(DialogueTurn),
    /// The stream failed; this apology turn replaced the partial reply.
    Failed(DialogueTurn),
    /// The send was a no-op (blank message or a stream already running).
    Ignored,
}

/// How a send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Completed(DialogueTurn),
    Failed(DialogueTurn),
    Ignored,
}

pub struct ChatConversation {
    dialogue: Arc<dyn Dialogue>,
    model: String,
    transcript: RwLock<Transcript>,
    streaming: AtomicBool,
}

/// Clears the streaming flag however the send exits.
struct StreamingGuard<'a>(&'a AtomicBool);

impl Drop for StreamingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ChatConversation {
    /// Open a dialogue with the Kalky GPT instruction and seed the greeting.
    pub fn open(provider: &dyn ChatProvider) -> Self {
        let mut transcript = Transcript::new();
        transcript.push(DialogueTurn::model(GREETING_TEXT).with_id(GREETING_ID));

        Self {
            dialogue: provider.open_dialogue(SYSTEM_INSTRUCTION),
            model: provider.model().to_string(),
            transcript: RwLock::new(transcript),
            streaming: AtomicBool::new(false),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub async fn turns(&self) -> Vec<DialogueTurn> {
        self.transcript.read().await.turns().to_vec()
    }

    /// Send `text` and aggregate the streamed reply into one model turn.
    ///
    /// Events go to `events` as they happen; a closed receiver does not stop
    /// the aggregation.
    pub async fn send(&self, text: &str, events: Option<mpsc::Sender<ChatEvent>>) -> SendOutcome {
        let notify = |event: ChatEvent| {
            let events = events.clone();
            async move {
                if let Some(tx) = events {
                    let _ = tx.send(event).await;
                }
            }
        };

        let text = text.trim();
        if text.is_empty()
            || self
                .streaming
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            tracing::debug!("Ignoring chat send: blank message or stream in progress");
            metrics::record_chat_message("ignored");
            notify(ChatEvent::Ignored).await;
            return SendOutcome::Ignored;
        }
        let _guard = StreamingGuard(&self.streaming);

        let user = DialogueTurn::user(text);
        let placeholder = DialogueTurn::model_placeholder();
        let model_id = placeholder.id.clone();
        {
            let mut transcript = self.transcript.write().await;
            transcript.push(user.clone());
            transcript.push(placeholder);
        }
        notify(ChatEvent::Started {
            user,
            model_id: model_id.clone(),
        })
        .await;

        let start = Instant::now();
        match self.pump(text, &model_id, &events).await {
            Ok(()) => {
                metrics::record_provider_latency("chat", &self.model, start.elapsed().as_secs_f64());
                let finished = self.transcript.write().await.finish(&model_id);
                match finished {
                    Some(turn) => {
                        tracing::info!(
                            turn_id = %turn.id,
                            reply_len = turn.text.len(),
                            "Chat reply completed"
                        );
                        metrics::record_chat_message("completed");
                        notify(ChatEvent::Finished(turn.clone())).await;
                        SendOutcome::Completed(turn)
                    }
                    None => self.fail(&model_id, &events).await,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chat stream failed");
                metrics::record_provider_error("chat", e.kind());
                self.fail(&model_id, &events).await
            }
        }
    }

    /// Drive the provider stream into the placeholder turn.
    async fn pump(
        &self,
        text: &str,
        model_id: &str,
        events: &Option<mpsc::Sender<ChatEvent>>,
    ) -> Result<(), ProviderError> {
        let mut stream = self.dialogue.send_message_stream(text).await?;

        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Text(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    self.transcript.write().await.append_delta(model_id, &delta);
                    if let Some(tx) = events {
                        let _ = tx.send(ChatEvent::Delta(delta)).await;
                    }
                }
                StreamChunk::Complete {
                    input_tokens,
                    output_tokens,
                    finish_reason,
                } => {
                    tracing::debug!(
                        input_tokens,
                        output_tokens,
                        finish_reason = ?finish_reason,
                        "Chat stream complete"
                    );
                    metrics::record_tokens(&self.model, input_tokens, output_tokens);
                }
            }
        }

        Ok(())
    }

    async fn fail(&self, model_id: &str, events: &Option<mpsc::Sender<ChatEvent>>) -> SendOutcome {
        let apology = DialogueTurn::model(APOLOGY_TEXT);
        {
            let mut transcript = self.transcript.write().await;
            transcript.discard(model_id);
            transcript.push(apology.clone());
        }
        metrics::record_chat_message("failed");
        if let Some(tx) = events {
            let _ = tx.send(ChatEvent::Failed(apology.clone())).await;
        }
        SendOutcome::Failed(apology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dialogue::Role;
    use crate::services::providers::mock::MockChatProvider;
    use std::time::Duration;

    #[tokio::test]
    async fn reply_is_concatenation_of_chunks() {
        let provider = MockChatProvider::new(true).with_chunks(["Kalky ", "Infra ", "builds."]);
        let conversation = ChatConversation::open(&provider);

        let outcome = conversation.send("What does Kalky Infra do?", None).await;

        let turn = match outcome {
            SendOutcome::Completed(turn) => turn,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(turn.text, "Kalky Infra builds.");
        assert!(!turn.is_streaming);

        let turns = conversation.turns().await;
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].id, GREETING_ID);
        assert_eq!(turns[1].role, Role::User);
        assert_eq!(turns[1].text, "What does Kalky Infra do?");
        assert_eq!(turns[2], turn);
    }

    #[tokio::test]
    async fn events_follow_arrival_order() {
        let provider = MockChatProvider::new(true).with_chunks(["a", "b"]);
        let conversation = ChatConversation::open(&provider);
        let (tx, mut rx) = mpsc::channel(16);

        conversation.send("hi", Some(tx)).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events[0], ChatEvent::Started { .. }));
        assert_eq!(events[1], ChatEvent::Delta("a".into()));
        assert_eq!(events[2], ChatEvent::Delta("b".into()));
        assert!(matches!(&events[3], ChatEvent::Finished(turn) if turn.text == "ab"));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn failure_replaces_partial_turn_with_apology() {
        let provider = MockChatProvider::new(true)
            .with_chunks(["partial ", "reply ", "lost"])
            .failing_after(2);
        let conversation = ChatConversation::open(&provider);

        let outcome = conversation.send("hello", None).await;

        let turn = match outcome {
            SendOutcome::Failed(turn) => turn,
            other => panic!("expected failure, got {:?}", other),
        };
        assert_eq!(turn.text, APOLOGY_TEXT);

        let turns = conversation.turns().await;
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].text, APOLOGY_TEXT);
        assert!(turns.iter().all(|t| !t.text.contains("partial")));
        assert!(!conversation.is_streaming());
    }

    #[tokio::test]
    async fn unopenable_stream_yields_apology() {
        let provider = MockChatProvider::new(false);
        let conversation = ChatConversation::open(&provider);

        assert!(matches!(
            conversation.send("hello", None).await,
            SendOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn second_send_while_streaming_is_ignored() {
        let provider = MockChatProvider::new(true)
            .with_chunks(["slow", " reply"])
            .with_chunk_delay(Duration::from_millis(50));
        let conversation = Arc::new(ChatConversation::open(&provider));

        let first = {
            let conversation = Arc::clone(&conversation);
            tokio::spawn(async move { conversation.send("first", None).await })
        };
        while !conversation.is_streaming() {
            tokio::task::yield_now().await;
        }

        assert_eq!(conversation.send("second", None).await, SendOutcome::Ignored);
        assert!(matches!(first.await.unwrap(), SendOutcome::Completed(_)));

        let turns = conversation.turns().await;
        assert_eq!(turns.len(), 3);
        assert!(turns.iter().all(|t| t.text != "second"));
    }

    #[tokio::test]
    async fn blank_message_is_ignored() {
        let conversation = ChatConversation::open(&MockChatProvider::new(true));
        assert_eq!(conversation.send("   ", None).await, SendOutcome::Ignored);
        assert_eq!(conversation.turns().await.len(), 1);
    }
}
