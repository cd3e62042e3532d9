//! Nearest-neighbour face matching against a class gallery.

use crate::types::{Descriptor, MatchResult, Student};

/// Default acceptance threshold for Euclidean descriptor distance.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Distance between two descriptors. Lower = more similar, never negative.
pub trait DistanceMetric {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32;
}

/// Plain L2 distance, the metric the reference encodings are calibrated for.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl DistanceMetric for Euclidean {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32 {
        a.euclidean_distance(b)
    }
}

/// Strategy for comparing an observed descriptor against a gallery of known students.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[Student], threshold: f32) -> MatchResult;
}

/// Takes the single closest gallery entry and accepts it iff `distance < threshold`.
///
/// Ties go to the entry that appears first in the gallery.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestMatcher<D = Euclidean> {
    metric: D,
}

impl<D: DistanceMetric> NearestMatcher<D> {
    pub fn with_metric(metric: D) -> Self {
        Self { metric }
    }
}

impl<D: DistanceMetric> Matcher for NearestMatcher<D> {
    fn compare(&self, probe: &Descriptor, gallery: &[Student], threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;
        let mut runner_up = f32::INFINITY;

        for (i, student) in gallery.iter().enumerate() {
            let dist = self.metric.distance(probe, &student.descriptor);
            let dist = if dist.is_nan() { f32::INFINITY } else { dist };
            // Strict `<` keeps the first-encountered entry on ties.
            if best_idx.is_none() || dist < best_dist {
                runner_up = best_dist;
                best_dist = dist;
                best_idx = Some(i);
            } else if dist < runner_up {
                runner_up = dist;
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => {
                if runner_up < threshold {
                    tracing::debug!(
                        best = %gallery[idx].id,
                        distance = best_dist,
                        runner_up,
                        "more than one student under match threshold; taking the closest"
                    );
                }
                MatchResult {
                    student_id: Some(gallery[idx].id.clone()),
                    distance: best_dist,
                }
            }
            _ => MatchResult::unknown(best_dist),
        }
    }
}
