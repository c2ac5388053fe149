// Error taxonomy for the classification core.

use thiserror::Error;

/// Failures reported by the session store, discriminator, and dispatcher.
///
/// None of these are fatal to the process; they describe the state of a
/// single session and are relayed to the caller as structured results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    /// A prediction was requested before any unlabeled keystrokes arrived.
    #[error("no unlabeled keystrokes have been received for this session")]
    EmptyBuffer,

    /// The labeled corpus cannot separate people: after chunking there are no
    /// samples at all, or they all carry the same label.
    #[error(
        "not enough training data: {samples} sample(s) across {labels} label(s), \
         need at least two labels"
    )]
    InsufficientTrainingData { samples: usize, labels: usize },

    #[error("unknown session `{0}`")]
    UnknownSession(String),

    #[error("unknown person `{person_id}` in session `{session_id}`")]
    UnknownPerson {
        session_id: String,
        person_id: String,
    },
}

impl ClassifyError {
    /// Stable machine-readable name, used as the `kind` of an error reply.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::EmptyBuffer => "empty_buffer",
            ClassifyError::InsufficientTrainingData { .. } => "insufficient_training_data",
            ClassifyError::UnknownSession(_) => "unknown_session",
            ClassifyError::UnknownPerson { .. } => "unknown_person",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_snake_case() {
        assert_eq!(ClassifyError::EmptyBuffer.kind(), "empty_buffer");
        assert_eq!(
            ClassifyError::InsufficientTrainingData {
                samples: 2,
                labels: 1
            }
            .kind(),
            "insufficient_training_data"
        );
        assert_eq!(
            ClassifyError::UnknownSession("g".into()).kind(),
            "unknown_session"
        );
    }

    #[test]
    fn insufficient_data_message_mentions_counts() {
        let err = ClassifyError::InsufficientTrainingData {
            samples: 3,
            labels: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 sample(s)"), "got: {msg}");
        assert!(msg.contains("1 label(s)"), "got: {msg}");
    }
}
