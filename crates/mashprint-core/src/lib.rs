// Library root for the keystroke classification core: per-session state,
// chunking, the lazily built discriminator, and the keystroke dispatcher.

pub mod chunker;
pub mod discriminator;
pub mod dispatcher;
pub mod error;
pub mod settings;
pub mod store;

pub use discriminator::Discriminator;
pub use dispatcher::{Dispatcher, Keystroke, Outcome, Phase};
pub use error::ClassifyError;
pub use settings::{ClassifierSettings, MASH_CHUNK_SIZE};
pub use store::{SessionStore, SessionSummary};
