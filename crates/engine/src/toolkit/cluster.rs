//! Seeded K-means and the label remapping contract used by the regime analyzer

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{mean, population_std};

const MAX_ITER: usize = 300;

#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

/// Z-score each column with the population std (a zero std maps the column to 0)
/// and return row-major points.
pub fn standardize(columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = columns.first().map_or(0, Vec::len);
    let scaled: Vec<Vec<f64>> = columns
        .iter()
        .map(|col| {
            let m = mean(col).unwrap_or(0.0);
            let s = population_std(col).unwrap_or(0.0);
            col.iter()
                .map(|v| if s > 0.0 { (v - m) / s } else { 0.0 })
                .collect()
        })
        .collect();
    (0..n)
        .map(|i| scaled.iter().map(|col| col[i]).collect())
        .collect()
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index of the nearest centroid; ties go to the lowest index
fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, c) in centroids.iter().enumerate() {
        let d = sq_dist(point, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

fn kmeans_plus_plus(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];
    while centroids.len() < k {
        let dists: Vec<f64> = points.iter().map(|p| nearest(p, &centroids).1).collect();
        let total: f64 = dists.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, d) in dists.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            rng.gen_range(0..points.len())
        };
        centroids.push(points[next].clone());
    }
    centroids
}

fn lloyd(points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>) -> KMeansFit {
    let dim = points[0].len();
    let mut labels = vec![usize::MAX; points.len()];

    for _ in 0..MAX_ITER {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let (j, _) = nearest(p, &centroids);
            if labels[i] != j {
                labels[i] = j;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (j, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f64>> = points
                .iter()
                .zip(&labels)
                .filter(|(_, l)| **l == j)
                .map(|(p, _)| p)
                .collect();
            // empty clusters keep their previous centroid
            if members.is_empty() {
                continue;
            }
            for d in 0..dim {
                centroid[d] = members.iter().map(|p| p[d]).sum::<f64>() / members.len() as f64;
            }
        }
    }

    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(p, l)| sq_dist(p, &centroids[*l]))
        .sum();
    KMeansFit {
        labels,
        centroids,
        inertia,
    }
}

/// K-means with k-means++ seeding, keeping the lowest-inertia of `n_init` runs.
/// Deterministic for a given seed.
pub fn kmeans(points: &[Vec<f64>], k: usize, seed: u64, n_init: usize) -> Option<KMeansFit> {
    if points.is_empty() || k == 0 || points[0].is_empty() {
        return None;
    }
    let k = k.min(points.len());
    let mut rng = StdRng::seed_from_u64(seed);

    let mut best: Option<KMeansFit> = None;
    for _ in 0..n_init.max(1) {
        let centroids = kmeans_plus_plus(points, k, &mut rng);
        let fit = lloyd(points, centroids);
        if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
            best = Some(fit);
        }
    }
    best
}

/// Relabel clusters so that label 0 has the lowest mean `feature`, then 1, 2...
/// Only non-empty clusters receive a label.
pub fn remap_by_feature(labels: &[usize], feature: &[f64]) -> Vec<usize> {
    let k = labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut sums = vec![0.0; k];
    let mut counts = vec![0usize; k];
    for (l, f) in labels.iter().zip(feature) {
        sums[*l] += f;
        counts[*l] += 1;
    }

    let mut order: Vec<(usize, f64)> = (0..k)
        .filter(|j| counts[*j] > 0)
        .map(|j| (j, sums[j] / counts[j] as f64))
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let mut rank = vec![0usize; k];
    for (r, (j, _)) in order.iter().enumerate() {
        rank[*j] = r;
    }
    labels.iter().map(|l| rank[*l]).collect()
}
