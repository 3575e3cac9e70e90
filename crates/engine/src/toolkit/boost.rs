//! Gradient-boosted regression stumps (squared loss)

#[derive(Debug, Clone)]
pub struct BoostParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    /// Minimum samples on each side of a split
    pub min_leaf: usize,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_rounds: 50,
            learning_rate: 0.1,
            min_leaf: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct Stump {
    feature: usize,
    threshold: f64,
    left: f64,
    right: f64,
}

impl Stump {
    fn predict(&self, row: &[f64]) -> f64 {
        if row[self.feature] <= self.threshold {
            self.left
        } else {
            self.right
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoostedStumps {
    base: f64,
    learning_rate: f64,
    stumps: Vec<Stump>,
    n_features: usize,
}

impl GradientBoostedStumps {
    /// Fit on row-major `features`. Fully deterministic: candidate splits are
    /// scanned in feature order and ties keep the first one found.
    pub fn fit(features: &[Vec<f64>], target: &[f64], params: &BoostParams) -> Option<Self> {
        let n = features.len();
        if n == 0 || n != target.len() || n < 2 * params.min_leaf.max(1) {
            return None;
        }
        let n_features = features[0].len();
        if n_features == 0 || features.iter().any(|r| r.len() != n_features) {
            return None;
        }
        if features.iter().flatten().chain(target).any(|v| !v.is_finite()) {
            return None;
        }

        let base = target.iter().sum::<f64>() / n as f64;
        let mut prediction = vec![base; n];
        let mut stumps = Vec::with_capacity(params.n_rounds);

        // sorted row order per feature, computed once
        let orders: Vec<Vec<usize>> = (0..n_features)
            .map(|f| {
                let mut idx: Vec<usize> = (0..n).collect();
                idx.sort_by(|a, b| features[*a][f].total_cmp(&features[*b][f]));
                idx
            })
            .collect();

        for _ in 0..params.n_rounds {
            let residual: Vec<f64> = target.iter().zip(&prediction).map(|(y, p)| y - p).collect();
            let Some(stump) = best_split(features, &residual, &orders, params.min_leaf.max(1)) else {
                break;
            };
            for (i, row) in features.iter().enumerate() {
                prediction[i] += params.learning_rate * stump.predict(row);
            }
            stumps.push(stump);
        }

        Some(Self {
            base,
            learning_rate: params.learning_rate,
            stumps,
            n_features,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        if row.len() != self.n_features || row.iter().any(|v| !v.is_finite()) {
            return f64::NAN;
        }
        self.base
            + self
                .stumps
                .iter()
                .map(|s| self.learning_rate * s.predict(row))
                .sum::<f64>()
    }

    pub fn n_stumps(&self) -> usize {
        self.stumps.len()
    }
}

fn best_split(
    features: &[Vec<f64>],
    residual: &[f64],
    orders: &[Vec<usize>],
    min_leaf: usize,
) -> Option<Stump> {
    let n = residual.len();
    let total: f64 = residual.iter().sum();
    let mut best: Option<(f64, Stump)> = None;

    for (f, order) in orders.iter().enumerate() {
        let mut left_sum = 0.0;
        for pos in 0..n - 1 {
            let i = order[pos];
            left_sum += residual[i];
            let left_n = pos + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let (here, next) = (features[i][f], features[order[pos + 1]][f]);
            if here == next {
                continue;
            }
            let right_sum = total - left_sum;
            // reduction in squared error relative to a single leaf
            let gain = left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64
                - total * total / n as f64;
            if best.as_ref().map_or(true, |(g, _)| gain > *g) {
                best = Some((
                    gain,
                    Stump {
                        feature: f,
                        threshold: (here + next) / 2.0,
                        left: left_sum / left_n as f64,
                        right: right_sum / right_n as f64,
                    },
                ));
            }
        }
    }

    best.filter(|(gain, _)| *gain > 1e-18).map(|(_, s)| s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learns_step_function() {
        let features: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64, 0.0]).collect();
        let target: Vec<f64> = (0..100).map(|i| if i < 50 { 1.0 } else { 3.0 }).collect();
        let model = GradientBoostedStumps::fit(&features, &target, &BoostParams::default()).unwrap();

        let low = model.predict(&[10.0, 0.0]);
        let high = model.predict(&[90.0, 0.0]);
        assert!((low - 1.0).abs() < 0.05, "low {}", low);
        assert!((high - 3.0).abs() < 0.05, "high {}", high);
    }

    #[test]
    fn test_constant_target_has_no_stumps() {
        let features: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let model =
            GradientBoostedStumps::fit(&features, &[2.0; 20], &BoostParams::default()).unwrap();
        assert_eq!(model.n_stumps(), 0);
        assert_eq!(model.predict(&[3.0]), 2.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(GradientBoostedStumps::fit(&[], &[], &BoostParams::default()).is_none());
        let features = vec![vec![f64::NAN]; 20];
        assert!(GradientBoostedStumps::fit(&features, &[1.0; 20], &BoostParams::default()).is_none());
    }
}
