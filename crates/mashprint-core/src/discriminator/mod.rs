// Discriminator: learns who typed a chunk of keystrokes.
//
// Features are TF-IDF weighted character n-grams (`tfidf`); the model is a
// one-vs-rest linear SVM over those features (`svm`). A trained discriminator
// is immutable and shared behind an `Arc` by the session store.

pub mod svm;
pub mod tfidf;

use std::collections::BTreeSet;

use tracing::debug;

use crate::chunker::Sample;
use crate::error::ClassifyError;
use crate::settings::ClassifierSettings;

use svm::{LinearSvm, SvmParams};
use tfidf::CharNgramVectorizer;

/// A trained mapping from a chunk of keystrokes to a person id.
#[derive(Debug, Clone)]
pub struct Discriminator {
    vectorizer: CharNgramVectorizer,
    model: LinearSvm,
    samples: usize,
}

impl Discriminator {
    /// Train on labeled chunks.
    ///
    /// Fails with [`ClassifyError::InsufficientTrainingData`] unless the
    /// samples cover at least two distinct labels; a single-label model would
    /// answer the same person for every input.
    pub fn train(samples: &[Sample], params: &SvmParams) -> Result<Self, ClassifyError> {
        let classes: BTreeSet<&str> = samples.iter().map(|s| s.label.as_str()).collect();
        if classes.len() < 2 {
            return Err(ClassifyError::InsufficientTrainingData {
                samples: samples.len(),
                labels: classes.len(),
            });
        }

        let texts: Vec<&str> = samples.iter().map(|s| s.text.as_str()).collect();
        let labels: Vec<&str> = samples.iter().map(|s| s.label.as_str()).collect();
        let (vectorizer, vectors) = CharNgramVectorizer::fit(&texts);

        let classes: Vec<String> = classes.into_iter().map(str::to_string).collect();
        let model = LinearSvm::fit(&vectors, &labels, classes, vectorizer.len(), params);

        debug!(
            samples = samples.len(),
            labels = model.classes().len(),
            features = vectorizer.len(),
            "trained discriminator"
        );

        Ok(Discriminator {
            vectorizer,
            model,
            samples: samples.len(),
        })
    }

    /// The person id that best matches `text`.
    pub fn predict(&self, text: &str) -> &str {
        self.model.predict(&self.vectorizer.transform(text))
    }

    /// Decision value per label, paired with the label, in label order.
    pub fn scores(&self, text: &str) -> Vec<(&str, f64)> {
        let values = self.model.decision_values(&self.vectorizer.transform(text));
        self.labels().iter().map(String::as_str).zip(values).collect()
    }

    /// Labels this discriminator can answer with, sorted.
    pub fn labels(&self) -> &[String] {
        self.model.classes()
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vectorizer.len()
    }

    /// Number of samples the discriminator was trained on.
    pub fn sample_count(&self) -> usize {
        self.samples
    }
}

impl From<&ClassifierSettings> for SvmParams {
    fn from(settings: &ClassifierSettings) -> Self {
        SvmParams {
            c: settings.c,
            tolerance: settings.tolerance,
            max_iterations: settings.max_iterations,
        }
    }
}
