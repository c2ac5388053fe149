// Wire protocol between clients and the classifier: JSON keystroke requests
// in, JSON replies out.
//
// Request:  {"char": "a", "sessionId": "game-1", "personId": "tyler"}
// Replies:  {}                                  training acknowledged
//           {"prediction": "tyler"}             best guess for the typist
//           {"error": {"kind": "...", "message": "..."}}

use mashprint_core::{ClassifyError, Dispatcher, Keystroke, Outcome, Phase};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A keystroke as it arrives on the wire. Every field is optional here so
/// that missing fields surface as [`RequestError::MalformedInput`] rather
/// than a bare serde error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystrokeRequest {
    #[serde(default, rename = "char")]
    pub character: Option<String>,
    /// Older clients call the session a game.
    #[serde(default, alias = "gameId")]
    pub session_id: Option<String>,
    /// Absent, `null`, or empty selects the prediction phase.
    #[serde(default)]
    pub person_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl RequestError {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::MalformedInput(_) => "malformed_input",
        }
    }
}

impl KeystrokeRequest {
    /// Validate the request and convert it into a core [`Keystroke`].
    pub fn into_keystroke(self) -> Result<Keystroke, RequestError> {
        let character = self
            .character
            .ok_or_else(|| RequestError::MalformedInput("missing field `char`".into()))?;
        let mut chars = character.chars();
        let ch = match (chars.next(), chars.next()) {
            (Some(ch), None) => ch,
            (None, _) => {
                return Err(RequestError::MalformedInput("`char` is empty".into()));
            }
            (Some(_), Some(_)) => {
                return Err(RequestError::MalformedInput(format!(
                    "`char` must be exactly one character, got {character:?}"
                )));
            }
        };

        let session_id = self
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RequestError::MalformedInput("missing field `sessionId`".into()))?;

        let person_id = self.person_id.filter(|id| !id.is_empty());

        Ok(Keystroke {
            session_id,
            phase: Phase::from_person_id(person_id),
            ch,
        })
    }
}

/// Parse and validate one raw JSON request.
pub fn decode(raw: &str) -> Result<Keystroke, RequestError> {
    let request: KeystrokeRequest = serde_json::from_str(raw.trim())
        .map_err(|e| RequestError::MalformedInput(format!("invalid JSON request: {e}")))?;
    request.into_keystroke()
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn failure(kind: &str, message: impl Into<String>) -> Self {
        Reply {
            prediction: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Outcome> for Reply {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Trained => Reply::default(),
            Outcome::Predicted { label } => Reply {
                prediction: Some(label),
                error: None,
            },
        }
    }
}

impl From<RequestError> for Reply {
    fn from(e: RequestError) -> Self {
        Reply::failure(e.kind(), e.to_string())
    }
}

impl From<ClassifyError> for Reply {
    fn from(e: ClassifyError) -> Self {
        Reply::failure(e.kind(), e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Handling
// ---------------------------------------------------------------------------

/// Decode `raw`, dispatch it, and build the reply. Never fails: every problem
/// becomes an error reply.
pub fn handle_request(dispatcher: &Dispatcher, raw: &str) -> Reply {
    let keystroke = match decode(raw) {
        Ok(keystroke) => keystroke,
        Err(e) => {
            warn!("Rejected request: {e}");
            return e.into();
        }
    };

    match dispatcher.dispatch(&keystroke) {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            warn!(session_id = %keystroke.session_id, "Keystroke failed: {e}");
            e.into()
        }
    }
}

/// [`handle_request`] on the blocking thread pool, since a prediction may
/// have to train the session's discriminator first.
pub async fn respond(dispatcher: &Dispatcher, raw: String) -> Reply {
    let dispatcher = dispatcher.clone();
    match tokio::task::spawn_blocking(move || handle_request(&dispatcher, &raw)).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Keystroke handler panicked: {e}");
            Reply::failure("internal", "keystroke handler failed")
        }
    }
}
