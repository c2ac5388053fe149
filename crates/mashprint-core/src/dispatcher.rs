// Keystroke dispatcher: one incoming keystroke, end to end.
//
// Training keystrokes are stored against their person and acknowledged.
// Prediction keystrokes join the session's unlabeled window, which is then
// classified by the session's discriminator (built on first use).

use std::sync::Arc;

use tracing::debug;

use crate::error::ClassifyError;
use crate::store::SessionStore;

/// Which phase a keystroke belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// The typist is known; the keystroke is training data for them.
    Training { person_id: String },
    /// The typist is unknown; the service should guess who it is.
    Predicting,
}

impl Phase {
    /// Training when a person id is present, predicting otherwise.
    pub fn from_person_id(person_id: Option<String>) -> Self {
        match person_id {
            Some(person_id) => Phase::Training { person_id },
            None => Phase::Predicting,
        }
    }

    pub fn person_id(&self) -> Option<&str> {
        match self {
            Phase::Training { person_id } => Some(person_id.as_str()),
            Phase::Predicting => None,
        }
    }
}

/// A single keystroke as seen by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keystroke {
    pub session_id: String,
    pub phase: Phase,
    pub ch: char,
}

/// Result of dispatching one keystroke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Training keystroke stored; nothing to report.
    Trained,
    /// Best guess for who typed the current unlabeled window.
    Predicted { label: String },
}

impl Outcome {
    pub fn prediction(&self) -> Option<&str> {
        match self {
            Outcome::Trained => None,
            Outcome::Predicted { label } => Some(label.as_str()),
        }
    }
}

/// Routes keystrokes into the shared [`SessionStore`]. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<SessionStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Dispatcher { store }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Store the keystroke and, in the prediction phase, classify the
    /// session's updated unlabeled window.
    pub fn dispatch(&self, keystroke: &Keystroke) -> Result<Outcome, ClassifyError> {
        let session_id = keystroke.session_id.as_str();
        self.store
            .record_keystroke(session_id, keystroke.phase.person_id(), keystroke.ch)?;

        match &keystroke.phase {
            Phase::Training { person_id } => {
                debug!(session_id, person_id = %person_id, "training keystroke");
                Ok(Outcome::Trained)
            }
            Phase::Predicting => {
                let label = self.predict(session_id)?;
                debug!(session_id, prediction = %label, "prediction keystroke");
                Ok(Outcome::Predicted { label })
            }
        }
    }

    /// Classify the session's current unlabeled window without adding a
    /// keystroke.
    ///
    /// An empty window fails with [`ClassifyError::EmptyBuffer`] before any
    /// discriminator is built.
    pub fn predict(&self, session_id: &str) -> Result<String, ClassifyError> {
        let window = self.store.unlabeled_buffer(session_id)?;
        if window.is_empty() {
            return Err(ClassifyError::EmptyBuffer);
        }
        let discriminator = self.store.get_or_build_discriminator(session_id)?;
        Ok(discriminator.predict(&window).to_string())
    }
}
