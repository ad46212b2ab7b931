//! Dialogue turns and the transcript that orders them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One message in a conversation.
///
/// `text` only changes while `is_streaming` is set; once the stream ends the
/// turn is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub is_streaming: bool,
}

impl DialogueTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            text: text.into(),
            is_streaming: false,
        }
    }

    /// A finished model turn with known text.
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Model,
            text: text.into(),
            is_streaming: false,
        }
    }

    /// An empty model turn waiting for deltas.
    pub fn model_placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::model(String::new())
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Ordered, append-only turn list. Only the trailing streaming model turn is
/// ever mutated in place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    turns: Vec<DialogueTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: DialogueTurn) {
        self.turns.push(turn);
    }

    /// Append a delta to the streaming turn `id`. Returns false when `id` is
    /// not the trailing streaming turn.
    pub fn append_delta(&mut self, id: &str, delta: &str) -> bool {
        match self.streaming_turn_mut(id) {
            Some(turn) => {
                turn.text.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Freeze the streaming turn `id` and return a copy of it.
    pub fn finish(&mut self, id: &str) -> Option<DialogueTurn> {
        let turn = self.streaming_turn_mut(id)?;
        turn.is_streaming = false;
        Some(turn.clone())
    }

    /// Drop the streaming turn `id` together with whatever text it gathered.
    pub fn discard(&mut self, id: &str) -> Option<DialogueTurn> {
        self.streaming_turn_mut(id)?;
        self.turns.pop()
    }

    pub fn turns(&self) -> &[DialogueTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn streaming_turn_mut(&mut self, id: &str) -> Option<&mut DialogueTurn> {
        self.turns
            .last_mut()
            .filter(|turn| turn.id == id && turn.is_streaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_accumulate_on_streaming_turn_only() {
        let mut transcript = Transcript::new();
        transcript.push(DialogueTurn::user("hi"));
        let placeholder = DialogueTurn::model_placeholder();
        let id = placeholder.id.clone();
        transcript.push(placeholder);

        assert!(transcript.append_delta(&id, "Hel"));
        assert!(transcript.append_delta(&id, "lo"));
        let done = transcript.finish(&id).unwrap();
        assert_eq!(done.text, "Hello");
        assert!(!done.is_streaming);

        // Final turns are immutable.
        assert!(!transcript.append_delta(&id, "!"));
        assert_eq!(transcript.turns()[1].text, "Hello");
    }

    #[test]
    fn discard_removes_partial_turn() {
        let mut transcript = Transcript::new();
        transcript.push(DialogueTurn::user("hi"));
        let placeholder = DialogueTurn::model_placeholder();
        let id = placeholder.id.clone();
        transcript.push(placeholder);
        transcript.append_delta(&id, "partial");

        let dropped = transcript.discard(&id).unwrap();
        assert_eq!(dropped.text, "partial");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.turns()[0].role, Role::User);
    }

    #[test]
    fn discard_ignores_finished_turns() {
        let mut transcript = Transcript::new();
        let turn = DialogueTurn::model("done").with_id("init");
        transcript.push(turn);
        assert!(transcript.discard("init").is_none());
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_value(DialogueTurn::user("x").with_id("1")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["is_streaming"], false);
    }
}
