//! Representation-quality scores over a labeled set of probe vectors
//!
//! All scores work on cosine geometry:
//! - `ba`: best balanced accuracy of "same category" decisions made by thresholding pairwise similarity
//! - `dp`: mean between-category minus mean within-category distance
//! - `cs`: share of probes whose nearest neighbour has the same category
//! - `si`: mean silhouette coefficient
//! - `sd`: mean distance between category centroids over mean distance of probes to their centroid

/// Probe vectors with their category indices and pairwise cosine similarities
#[derive(Debug, Clone)]
pub struct ProbeSpace {
    vectors: Vec<Vec<f32>>,
    labels: Vec<usize>,
    num_categories: usize,
    similarities: Vec<Vec<f32>>,
}

impl ProbeSpace {
    pub fn new(vectors: Vec<Vec<f32>>, labels: Vec<usize>) -> Self {
        debug_assert_eq!(vectors.len(), labels.len());
        let num_categories = labels.iter().max().map_or(0, |&m| m + 1);
        let similarities = vectors
            .iter()
            .map(|a| vectors.iter().map(|b| cosine_similarity(a, b)).collect())
            .collect();

        Self {
            vectors,
            labels,
            num_categories,
            similarities,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn num_categories(&self) -> usize {
        self.num_categories
    }

    fn distance(&self, i: usize, j: usize) -> f32 {
        1.0 - self.similarities[i][j]
    }

    fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let n = self.len();
        (0..n).flat_map(move |i| (i + 1..n).map(move |j| (i, j)))
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = values.fold((0.0f64, 0usize), |(s, c), v| (s + v as f64, c + 1));
    if count == 0 { 0.0 } else { (sum / count as f64) as f32 }
}

/// Best balanced accuracy over every similarity threshold.
///
/// Returns chance (0.5) when there are no same-category or no different-category pairs.
pub fn balanced_accuracy(space: &ProbeSpace) -> f32 {
    let mut pairs: Vec<(f32, bool)> = space
        .pairs()
        .map(|(i, j)| (space.similarities[i][j], space.labels[i] == space.labels[j]))
        .collect();
    let num_pos = pairs.iter().filter(|(_, same)| *same).count();
    let num_neg = pairs.len() - num_pos;
    if num_pos == 0 || num_neg == 0 {
        return 0.5;
    }

    // Sweep the threshold downwards; pairs at or above it are predicted "same"
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut best = 0.5f32;
    let mut k = 0;
    while k < pairs.len() {
        let threshold = pairs[k].0;
        while k < pairs.len() && pairs[k].0 == threshold {
            if pairs[k].1 { tp += 1 } else { fp += 1 }
            k += 1;
        }
        let tpr = tp as f32 / num_pos as f32;
        let tnr = (num_neg - fp) as f32 / num_neg as f32;
        best = best.max((tpr + tnr) / 2.0);
    }
    best
}

/// Mean between-category distance minus mean within-category distance.
pub fn distance_difference(space: &ProbeSpace) -> f32 {
    let between = mean(
        space
            .pairs()
            .filter(|&(i, j)| space.labels[i] != space.labels[j])
            .map(|(i, j)| space.distance(i, j)),
    );
    let within = mean(
        space
            .pairs()
            .filter(|&(i, j)| space.labels[i] == space.labels[j])
            .map(|(i, j)| space.distance(i, j)),
    );
    between - within
}

/// Share of probes whose most similar other probe has the same category.
pub fn cluster_score(space: &ProbeSpace) -> f32 {
    let n = space.len();
    if n < 2 {
        return 0.0;
    }

    let hits = (0..n)
        .filter(|&i| {
            let nearest = (0..n)
                .filter(|&j| j != i)
                .max_by(|&a, &b| space.similarities[i][a].total_cmp(&space.similarities[i][b]));
            nearest.is_some_and(|j| space.labels[j] == space.labels[i])
        })
        .count();
    hits as f32 / n as f32
}

/// Mean silhouette coefficient under cosine distance; probes alone in their category score 0.
pub fn silhouette(space: &ProbeSpace) -> f32 {
    let n = space.len();
    let mut sizes = vec![0usize; space.num_categories];
    for &label in &space.labels {
        sizes[label] += 1;
    }

    mean((0..n).map(|i| {
        let own = space.labels[i];
        if sizes[own] < 2 {
            return 0.0;
        }

        let mut sums = vec![0.0f32; space.num_categories];
        for j in (0..n).filter(|&j| j != i) {
            sums[space.labels[j]] += space.distance(i, j);
        }
        let a = sums[own] / (sizes[own] - 1) as f32;
        let b = (0..space.num_categories)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| sums[c] / sizes[c] as f32)
            .fold(f32::INFINITY, f32::min);
        if !b.is_finite() {
            return 0.0;
        }

        let scale = a.max(b);
        if scale == 0.0 { 0.0 } else { (b - a) / scale }
    }))
}

/// Mean pairwise distance between category centroids over the mean distance of probes to their centroid.
pub fn separation(space: &ProbeSpace) -> f32 {
    let dim = space.vectors.first().map_or(0, Vec::len);
    let mut centroids = vec![vec![0.0f32; dim]; space.num_categories];
    let mut sizes = vec![0usize; space.num_categories];
    for (vector, &label) in space.vectors.iter().zip(&space.labels) {
        sizes[label] += 1;
        for (c, v) in centroids[label].iter_mut().zip(vector) {
            *c += v;
        }
    }
    for (centroid, &size) in centroids.iter_mut().zip(&sizes) {
        if size > 0 {
            centroid.iter_mut().for_each(|c| *c /= size as f32);
        }
    }

    let present: Vec<usize> = (0..space.num_categories).filter(|&c| sizes[c] > 0).collect();
    let between = mean(present.iter().enumerate().flat_map(|(k, &a)| {
        let centroids = &centroids;
        present[k + 1..]
            .iter()
            .map(move |&b| 1.0 - cosine_similarity(&centroids[a], &centroids[b]))
    }));
    let spread = mean(
        space
            .vectors
            .iter()
            .zip(&space.labels)
            .map(|(vector, &label)| 1.0 - cosine_similarity(vector, &centroids[label])),
    );

    between / spread.max(1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight, orthogonal clusters
    fn clustered() -> ProbeSpace {
        ProbeSpace::new(
            vec![
                vec![1.0, 0.0],
                vec![0.9, 0.1],
                vec![0.0, 1.0],
                vec![0.1, 0.9],
            ],
            vec![0, 0, 1, 1],
        )
    }

    /// Categories interleaved against the geometry
    fn mixed() -> ProbeSpace {
        ProbeSpace::new(
            vec![
                vec![1.0, 0.0],
                vec![0.9, 0.1],
                vec![0.0, 1.0],
                vec![0.1, 0.9],
            ],
            vec![0, 1, 0, 1],
        )
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_balanced_accuracy() {
        assert!((balanced_accuracy(&clustered()) - 1.0).abs() < 1e-6);
        assert!(balanced_accuracy(&mixed()) < 1.0);
        let single = ProbeSpace::new(vec![vec![1.0], vec![2.0]], vec![0, 1]);
        assert_eq!(balanced_accuracy(&single), 0.5);
    }

    #[test]
    fn test_distance_difference_sign() {
        assert!(distance_difference(&clustered()) > 0.5);
        assert!(distance_difference(&mixed()) < 0.0);
    }

    #[test]
    fn test_cluster_score() {
        assert_eq!(cluster_score(&clustered()), 1.0);
        assert_eq!(cluster_score(&mixed()), 0.0);
    }

    #[test]
    fn test_silhouette() {
        let si = silhouette(&clustered());
        assert!(si > 0.8 && si <= 1.0);
        assert!(silhouette(&mixed()) < 0.0);

        let singleton = ProbeSpace::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![0, 1]);
        assert_eq!(silhouette(&singleton), 0.0);
    }

    #[test]
    fn test_separation() {
        assert!(separation(&clustered()) > separation(&mixed()));
    }
}
