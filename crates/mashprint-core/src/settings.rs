// Classifier settings shared by the session store and the discriminator.

use serde::Deserialize;

/// Length of both the training chunks and the unlabeled window we classify
/// (the most recent N characters).
pub const MASH_CHUNK_SIZE: usize = 30;

/// Tunables for chunking, caching, and the linear model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Chunk length used for buffer trimming and training-sample generation.
    pub mash_chunk_size: usize,
    /// Retrain a cached discriminator on the next prediction once more labeled
    /// characters have arrived. Off by default: the first build is final.
    pub rebuild_on_new_labeled_data: bool,
    /// Inverse regularization strength of the linear SVM.
    pub c: f64,
    /// Stopping tolerance on the projected-gradient spread.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings {
            mash_chunk_size: MASH_CHUNK_SIZE,
            rebuild_on_new_labeled_data: false,
            c: 1.0,
            tolerance: 1e-4,
            max_iterations: 1000,
        }
    }
}
