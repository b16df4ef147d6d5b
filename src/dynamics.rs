//! Temporal-dynamics metrics
//!
//! Computes per-subject state dynamics from a label sequence alone:
//! - Fractional occupancy (share of timepoints in each state)
//! - Dwell time (mean run length in seconds)
//! - Appearance rate (runs per minute of scan)
//! - Transition probabilities with and without self-transitions
//!
//! Per-subject results are stacked into cohort tensors. Vectors are laid out
//! as (states x subjects) and transition matrices as (subjects x states x
//! states); downstream tooling indexes these axes positionally.

use crate::error::{Result, StateError};
use crate::harmonizer::{strip_reject_rows, strip_reject_transitions};
use crate::types::{LabelSequence, StateSpace, SubjectId};
use ndarray::{Array1, Array2, Array3, Axis};

/// Maximal run of a constant label covering `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub label: i64,
    pub start: usize,
    pub end: usize,
}

impl Block {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split a label sequence into maximal constant runs
pub fn blocks(labels: &[i64]) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut start = 0;
    for t in 1..=labels.len() {
        if t == labels.len() || labels[t] != labels[t - 1] {
            blocks.push(Block {
                label: labels[start],
                start,
                end: t,
            });
            start = t;
        }
    }
    blocks
}

/// Zero-based state index of a 1-based label, if it is tracked
fn state_index(label: i64, n_states: usize) -> Option<usize> {
    usize::try_from(label)
        .ok()
        .and_then(|l| l.checked_sub(1))
        .filter(|&i| i < n_states)
}

/// Count adjacent (t -> t+1) label pairs; untracked labels are ignored
pub fn transition_counts(labels: &[i64], n_states: usize) -> Array2<f64> {
    let mut counts = Array2::<f64>::zeros((n_states, n_states));
    for pair in labels.windows(2) {
        if let (Some(from), Some(to)) = (
            state_index(pair[0], n_states),
            state_index(pair[1], n_states),
        ) {
            counts[[from, to]] += 1.0;
        }
    }
    counts
}

/// Row-normalize a count matrix; rows summing to zero stay all-zero
pub fn row_normalize(counts: &Array2<f64>) -> Array2<f64> {
    let mut probabilities = counts.to_owned();
    for mut row in probabilities.axis_iter_mut(Axis(0)) {
        let total = row.sum();
        if total != 0.0 {
            row.mapv_inplace(|c| c / total);
        } else {
            row.fill(0.0);
        }
    }
    probabilities
}

/// Dynamics of one subject's label sequence
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectDynamics {
    pub fractional_occupancy: Array1<f64>,
    /// Seconds
    pub dwell_time: Array1<f64>,
    /// Runs per minute
    pub appearance_rate: Array1<f64>,
    pub transition_probability: Array2<f64>,
    pub transition_probability_no_persist: Array2<f64>,
}

impl SubjectDynamics {
    /// Compute all metrics for `n_states` tracked states.
    ///
    /// The scan length is the sequence length times `sampling_interval_s`.
    pub fn compute(labels: &LabelSequence, n_states: usize, sampling_interval_s: f64) -> Self {
        let labels = labels.as_slice();
        let total = labels.len();
        let scan_minutes = total as f64 * sampling_interval_s / 60.0;

        let mut occupancy = Array1::<f64>::zeros(n_states);
        for &label in labels {
            if let Some(i) = state_index(label, n_states) {
                occupancy[i] += 1.0;
            }
        }
        if total > 0 {
            occupancy /= total as f64;
        }

        let mut run_lengths = vec![0usize; n_states];
        let mut run_counts = vec![0usize; n_states];
        for block in blocks(labels) {
            if let Some(i) = state_index(block.label, n_states) {
                run_lengths[i] += block.len();
                run_counts[i] += 1;
            }
        }

        let dwell_time = Array1::from_iter((0..n_states).map(|i| {
            if run_counts[i] > 0 {
                run_lengths[i] as f64 / run_counts[i] as f64 * sampling_interval_s
            } else {
                0.0
            }
        }));
        let appearance_rate = Array1::from_iter((0..n_states).map(|i| {
            if run_counts[i] > 0 && scan_minutes > 0.0 {
                run_counts[i] as f64 / scan_minutes
            } else {
                0.0
            }
        }));

        let counts = transition_counts(labels, n_states);
        let transition_probability = row_normalize(&counts);
        let mut no_persist = counts;
        no_persist.diag_mut().fill(0.0);
        let transition_probability_no_persist = row_normalize(&no_persist);

        Self {
            fractional_occupancy: occupancy,
            dwell_time,
            appearance_rate,
            transition_probability,
            transition_probability_no_persist,
        }
    }

    pub fn n_states(&self) -> usize {
        self.fractional_occupancy.len()
    }
}

/// Stacked dynamics for one cohort under one state space
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDynamics {
    space: StateSpace,
    subjects: Vec<SubjectId>,
    /// (states x subjects)
    pub fractional_occupancy: Array2<f64>,
    /// (states x subjects)
    pub dwell_time: Array2<f64>,
    /// (states x subjects)
    pub appearance_rate: Array2<f64>,
    /// (subjects x states x states)
    pub transition_probability: Array3<f64>,
    /// (subjects x states x states)
    pub transition_probability_no_persist: Array3<f64>,
}

impl GroupDynamics {
    /// Stack per-subject results in the given order
    pub fn stack(space: StateSpace, results: Vec<(SubjectId, SubjectDynamics)>) -> Result<Self> {
        let n_states = space.n_states();
        let n_subjects = results.len();

        let mut fo = Array2::<f64>::zeros((n_states, n_subjects));
        let mut dt = Array2::<f64>::zeros((n_states, n_subjects));
        let mut ar = Array2::<f64>::zeros((n_states, n_subjects));
        let mut tp = Array3::<f64>::zeros((n_subjects, n_states, n_states));
        let mut tp_np = Array3::<f64>::zeros((n_subjects, n_states, n_states));
        let mut subjects = Vec::with_capacity(n_subjects);

        for (column, (subject, dynamics)) in results.into_iter().enumerate() {
            if dynamics.n_states() != n_states {
                return Err(StateError::shape(
                    format!("dynamics of subject {subject}"),
                    n_states,
                    dynamics.n_states(),
                ));
            }
            fo.column_mut(column).assign(&dynamics.fractional_occupancy);
            dt.column_mut(column).assign(&dynamics.dwell_time);
            ar.column_mut(column).assign(&dynamics.appearance_rate);
            tp.index_axis_mut(Axis(0), column)
                .assign(&dynamics.transition_probability);
            tp_np
                .index_axis_mut(Axis(0), column)
                .assign(&dynamics.transition_probability_no_persist);
            subjects.push(subject);
        }

        Ok(Self {
            space,
            subjects,
            fractional_occupancy: fo,
            dwell_time: dt,
            appearance_rate: ar,
            transition_probability: tp,
            transition_probability_no_persist: tp_np,
        })
    }

    pub fn space(&self) -> &StateSpace {
        &self.space
    }

    /// Subject order of the subject axis
    pub fn subjects(&self) -> &[SubjectId] {
        &self.subjects
    }

    /// Drop the trailing reject slot so results compare with a reject-free run
    pub fn without_reject(self) -> Result<Self> {
        let space = self.space.without_reject_slot()?;
        Ok(Self {
            fractional_occupancy: strip_reject_rows(&self.space, &self.fractional_occupancy)?,
            dwell_time: strip_reject_rows(&self.space, &self.dwell_time)?,
            appearance_rate: strip_reject_rows(&self.space, &self.appearance_rate)?,
            transition_probability: strip_reject_transitions(
                &self.space,
                &self.transition_probability,
            )?,
            transition_probability_no_persist: strip_reject_transitions(
                &self.space,
                &self.transition_probability_no_persist,
            )?,
            subjects: self.subjects,
            space,
        })
    }
}
