// One-vs-rest linear support vector machine.
//
// Each label gets its own binary classifier (that label vs. everyone else),
// trained with L2 regularization and squared hinge loss by dual coordinate
// descent. The intercept is learned as the weight of a constant bias feature
// of value 1, so it is regularized like every other weight.

use super::tfidf::SparseVector;

/// Solver parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvmParams {
    /// Inverse regularization strength. Larger values fit the data harder.
    pub c: f64,
    /// Stop once the spread of projected gradients falls below this.
    pub tolerance: f64,
    /// Upper bound on full passes over the samples, per label.
    pub max_iterations: usize,
}

impl Default for SvmParams {
    fn default() -> Self {
        SvmParams {
            c: 1.0,
            tolerance: 1e-4,
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Clone)]
struct BinaryModel {
    weights: Vec<f64>,
    bias: f64,
}

impl BinaryModel {
    fn decision(&self, x: &SparseVector) -> f64 {
        x.iter().map(|&(j, v)| self.weights[j] * v).sum::<f64>() + self.bias
    }
}

/// A fitted multi-class linear model.
#[derive(Debug, Clone)]
pub struct LinearSvm {
    classes: Vec<String>,
    models: Vec<BinaryModel>,
}

impl LinearSvm {
    /// Fit one binary model per class in `classes` over `vectors`, where
    /// `labels[i]` is the class of `vectors[i]`. `n_features` is the
    /// dimensionality of the vectors.
    pub fn fit(
        vectors: &[SparseVector],
        labels: &[&str],
        classes: Vec<String>,
        n_features: usize,
        params: &SvmParams,
    ) -> Self {
        let models = classes
            .iter()
            .map(|class| {
                let targets: Vec<f64> = labels
                    .iter()
                    .map(|label| if *label == class.as_str() { 1.0 } else { -1.0 })
                    .collect();
                solve(vectors, &targets, n_features, params)
            })
            .collect();
        LinearSvm { classes, models }
    }

    /// Decision value of every class for `x`, in class order.
    pub fn decision_values(&self, x: &SparseVector) -> Vec<f64> {
        self.models.iter().map(|m| m.decision(x)).collect()
    }

    /// The class with the highest decision value. Ties go to the class that
    /// sorts first.
    pub fn predict(&self, x: &SparseVector) -> &str {
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (index, score) in self.decision_values(x).into_iter().enumerate() {
            if score > best_score {
                best = index;
                best_score = score;
            }
        }
        &self.classes[best]
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

/// Dual coordinate descent for the L2-regularized, L2-loss SVM with targets
/// in {-1, +1}.
fn solve(
    vectors: &[SparseVector],
    targets: &[f64],
    n_features: usize,
    params: &SvmParams,
) -> BinaryModel {
    let diag = 0.5 / params.c;
    // Q_ii plus the bias feature's contribution (1 * 1).
    let q_diag: Vec<f64> = vectors
        .iter()
        .map(|x| diag + x.iter().map(|(_, v)| v * v).sum::<f64>() + 1.0)
        .collect();

    let mut alpha = vec![0.0; vectors.len()];
    let mut model = BinaryModel {
        weights: vec![0.0; n_features],
        bias: 0.0,
    };

    for _ in 0..params.max_iterations {
        let mut pg_max = f64::NEG_INFINITY;
        let mut pg_min = f64::INFINITY;

        for (i, x) in vectors.iter().enumerate() {
            let y = targets[i];
            let gradient = y * model.decision(x) - 1.0 + diag * alpha[i];
            let projected = if alpha[i] == 0.0 {
                gradient.min(0.0)
            } else {
                gradient
            };
            pg_max = pg_max.max(projected);
            pg_min = pg_min.min(projected);

            if projected.abs() > 1e-12 {
                let previous = alpha[i];
                alpha[i] = (previous - gradient / q_diag[i]).max(0.0);
                let step = (alpha[i] - previous) * y;
                for &(j, v) in x {
                    model.weights[j] += step * v;
                }
                model.bias += step;
            }
        }

        if pg_max - pg_min <= params.tolerance {
            break;
        }
    }

    model
}
