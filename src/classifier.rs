//! Dominant-state classification
//!
//! Each timepoint is assigned to the network whose regions have the highest
//! mean activity. If that mean does not reach the activation threshold the
//! timepoint is assigned to the reject state. Timepoints are classified
//! independently; there is no smoothing across time.

use crate::error::{Result, StateError};
use crate::types::{LabelSequence, LabelSet, RegionNetworkMap, StateLabel};
use ndarray::{Array2, ArrayView1, Axis};

/// Default activation threshold (z-score units)
pub const DEFAULT_ACTIVATION_THRESHOLD: f64 = 0.0;

/// Per-timepoint dominant network classifier
#[derive(Debug, Clone)]
pub struct DominantStateClassifier {
    labels: LabelSet,
    members: Vec<Vec<usize>>,
    region_count: usize,
    threshold: Option<f64>,
}

impl DominantStateClassifier {
    /// Build a classifier for `labels`.
    ///
    /// `threshold = None` disables the reject branch: every timepoint goes to
    /// its maximal network.
    pub fn new(labels: LabelSet, map: &RegionNetworkMap, threshold: Option<f64>) -> Result<Self> {
        if map.network_count() != labels.network_count() {
            return Err(StateError::InvalidMapping(format!(
                "map covers {} networks but the label set has {}",
                map.network_count(),
                labels.network_count()
            )));
        }
        if let Some(t) = threshold {
            if !t.is_finite() {
                return Err(StateError::InvalidConfig(format!(
                    "activation threshold must be finite, got {t}"
                )));
            }
        }

        Ok(Self {
            labels,
            members: map.network_members(),
            region_count: map.len(),
            threshold,
        })
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Mean activity of each network at one timepoint, in label order
    pub fn network_means(&self, activity: ArrayView1<f64>) -> Vec<f64> {
        self.members
            .iter()
            .map(|columns| {
                let sum: f64 = columns.iter().map(|&c| activity[c]).sum();
                sum / columns.len() as f64
            })
            .collect()
    }

    /// Classify a single timepoint's region activity
    pub fn classify_timepoint(&self, activity: ArrayView1<f64>) -> StateLabel {
        let means = self.network_means(activity);

        // first maximum wins on exact ties; NaN means never win
        let mut best: Option<(usize, f64)> = None;
        for (i, &mean) in means.iter().enumerate() {
            if mean.is_nan() {
                continue;
            }
            match best {
                Some((_, top)) if mean <= top => {}
                _ => best = Some((i, mean)),
            }
        }

        match best {
            Some((i, mean)) if self.threshold.map_or(true, |t| mean >= t) => {
                StateLabel::Network(self.labels.networks()[i])
            }
            _ => StateLabel::Reject,
        }
    }

    /// Classify every timepoint of a normalized (time x region) matrix
    pub fn classify(&self, activity: &Array2<f64>) -> Result<LabelSequence> {
        if activity.ncols() != self.region_count {
            return Err(StateError::shape(
                "classifier regions",
                self.region_count,
                activity.ncols(),
            ));
        }

        let codes = activity
            .axis_iter(Axis(0))
            .map(|row| {
                let label = self.classify_timepoint(row);
                // every label produced here belongs to self.labels
                i64::from(self.labels.encode(label).unwrap_or(self.labels.reject_id()))
            })
            .collect();

        Ok(LabelSequence::new(codes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Network, RegionAssignment};
    use ndarray::array;

    fn two_network_setup() -> (LabelSet, RegionNetworkMap) {
        let labels = LabelSet::new(vec![Network::Visual, Network::Default]).unwrap();
        let map = RegionNetworkMap::new(
            vec![
                RegionAssignment { region: 1, network_id: 1 },
                RegionAssignment { region: 2, network_id: 1 },
                RegionAssignment { region: 3, network_id: 2 },
                RegionAssignment { region: 4, network_id: 2 },
            ],
            &labels,
        )
        .unwrap();
        (labels, map)
    }

    #[test]
    fn test_network_means() {
        let (labels, map) = two_network_setup();
        let classifier = DominantStateClassifier::new(labels, &map, Some(0.0)).unwrap();
        let row = array![1.0, 3.0, -1.0, 0.0];
        assert_eq!(classifier.network_means(row.view()), vec![2.0, -0.5]);
    }

    #[test]
    fn test_max_network_wins() {
        let (labels, map) = two_network_setup();
        let classifier = DominantStateClassifier::new(labels, &map, Some(0.0)).unwrap();

        let activity = array![
            [1.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 2.0, 0.5],
            [-1.0, -1.0, -2.0, -2.0],
        ];
        let sequence = classifier.classify(&activity).unwrap();
        assert_eq!(sequence.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let (labels, map) = two_network_setup();
        let classifier = DominantStateClassifier::new(labels, &map, Some(0.5)).unwrap();

        let at_threshold = array![0.5, 0.5, 0.0, 0.0];
        assert_eq!(
            classifier.classify_timepoint(at_threshold.view()),
            StateLabel::Network(Network::Visual)
        );
        let below = array![0.4, 0.4, 0.0, 0.0];
        assert_eq!(classifier.classify_timepoint(below.view()), StateLabel::Reject);
    }

    #[test]
    fn test_exact_tie_goes_to_first_network() {
        let (labels, map) = two_network_setup();
        let classifier = DominantStateClassifier::new(labels, &map, Some(0.0)).unwrap();
        let tie = array![1.0, 1.0, 2.0, 0.0];
        assert_eq!(
            classifier.classify_timepoint(tie.view()),
            StateLabel::Network(Network::Visual)
        );
    }

    #[test]
    fn test_unthresholded_never_rejects() {
        let (labels, map) = two_network_setup();
        let classifier = DominantStateClassifier::new(labels, &map, None).unwrap();
        let negative = array![[-3.0, -3.0, -1.0, -1.0]];
        assert_eq!(classifier.classify(&negative).unwrap().as_slice(), &[2]);
    }

    #[test]
    fn test_threshold_above_every_mean_rejects_all() {
        let (labels, map) = two_network_setup();
        let classifier = DominantStateClassifier::new(labels, &map, Some(100.0)).unwrap();
        let activity = array![[1.0, 2.0, 3.0, 4.0], [4.0, 3.0, 2.0, 1.0]];
        assert_eq!(classifier.classify(&activity).unwrap().as_slice(), &[3, 3]);
    }

    #[test]
    fn test_region_count_mismatch_is_recoverable() {
        let (labels, map) = two_network_setup();
        let classifier = DominantStateClassifier::new(labels, &map, Some(0.0)).unwrap();
        let err = classifier.classify(&array![[1.0, 2.0]]).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_mismatched_label_set_is_rejected() {
        let (_, map) = two_network_setup();
        let labels = LabelSet::canonical();
        assert!(DominantStateClassifier::new(labels, &map, Some(0.0)).is_err());
    }
}
