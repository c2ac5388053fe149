// Character n-gram TF-IDF features.

use std::collections::{BTreeMap, HashMap};

/// A sparse, L2-normalized feature vector: `(feature index, weight)` pairs
/// sorted by index.
pub type SparseVector = Vec<(usize, f64)>;

/// Shortest and longest n-gram extracted from a chunk.
const MIN_N: usize = 1;
const MAX_N: usize = 3;

/// Maps text onto a fixed vocabulary of character 1- to 3-grams, weighting
/// each by term frequency times smoothed inverse document frequency.
///
/// The vocabulary and IDF weights are frozen at [`fit`](Self::fit) time;
/// n-grams never seen during fitting contribute nothing to later vectors.
#[derive(Debug, Clone)]
pub struct CharNgramVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl CharNgramVectorizer {
    /// Learn the vocabulary and IDF weights from `corpus` and return the
    /// fitted vectorizer along with the vector of every document.
    pub fn fit<S: AsRef<str>>(corpus: &[S]) -> (Self, Vec<SparseVector>) {
        let counts: Vec<HashMap<String, usize>> =
            corpus.iter().map(|doc| ngram_counts(doc.as_ref())).collect();

        // Sorted so feature indices do not depend on hash order.
        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for doc in &counts {
            for gram in doc.keys() {
                *document_frequency.entry(gram.as_str()).or_insert(0) += 1;
            }
        }

        let n_docs = corpus.len() as f64;
        let mut vocabulary = HashMap::with_capacity(document_frequency.len());
        let mut idf = Vec::with_capacity(document_frequency.len());
        for (index, (gram, df)) in document_frequency.into_iter().enumerate() {
            vocabulary.insert(gram.to_string(), index);
            idf.push(((1.0 + n_docs) / (1.0 + df as f64)).ln() + 1.0);
        }

        let vectorizer = CharNgramVectorizer { vocabulary, idf };
        let vectors = counts.iter().map(|c| vectorizer.weigh(c)).collect();
        (vectorizer, vectors)
    }

    /// Project `text` onto the fitted vocabulary.
    pub fn transform(&self, text: &str) -> SparseVector {
        self.weigh(&ngram_counts(text))
    }

    /// Number of distinct n-grams in the fitted vocabulary.
    pub fn len(&self) -> usize {
        self.idf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idf.is_empty()
    }

    fn weigh(&self, counts: &HashMap<String, usize>) -> SparseVector {
        let mut vector: SparseVector = counts
            .iter()
            .filter_map(|(gram, &tf)| {
                self.vocabulary
                    .get(gram)
                    .map(|&index| (index, tf as f64 * self.idf[index]))
            })
            .collect();
        vector.sort_unstable_by_key(|&(index, _)| index);

        let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut vector {
                *w /= norm;
            }
        }
        vector
    }
}

/// Lowercase, collapse runs of two or more whitespace characters to a single
/// space, then count every overlapping character n-gram of length
/// `MIN_N..=MAX_N`.
fn ngram_counts(text: &str) -> HashMap<String, usize> {
    let normalized = normalize(text);
    let chars: Vec<char> = normalized.chars().collect();
    let mut counts = HashMap::new();
    for n in MIN_N..=MAX_N {
        for window in chars.windows(n) {
            *counts.entry(window.iter().collect::<String>()).or_insert(0) += 1;
        }
    }
    counts
}

fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run: Vec<char> = Vec::new();
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            run.push(ch);
            continue;
        }
        flush_whitespace(&mut out, &mut run);
        out.push(ch);
    }
    flush_whitespace(&mut out, &mut run);
    out
}

/// A lone whitespace keystroke is kept as typed; a run of two or more
/// becomes a single space.
fn flush_whitespace(out: &mut String, run: &mut Vec<char>) {
    match run.as_slice() {
        [] => {}
        [single] => out.push(*single),
        _ => out.push(' '),
    }
    run.clear();
}
