//! State-map aggregation
//!
//! A state map is the mean activity pattern across all timepoints assigned to
//! one state. Timepoints are bucketed by label in a single pass over the
//! sequence. States that never occur get an all-zero map so every subject
//! contributes the same set of states to the cohort table.

use crate::error::{Result, StateError};
use crate::types::{LabelSequence, LabelSet, Network, RegionNetworkMap, StateLabel, SubjectId};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Mean activity of one state for one subject
#[derive(Debug, Clone, PartialEq)]
pub struct StateMap {
    pub state: StateLabel,
    /// Number of timepoints assigned to the state
    pub occurrences: usize,
    /// Mean activity per region (length R)
    pub values: Array1<f64>,
}

/// Compute one state map per label (reject last) from normalized activity
pub fn subject_state_maps(
    activity: &Array2<f64>,
    sequence: &LabelSequence,
    labels: &LabelSet,
) -> Result<Vec<StateMap>> {
    if activity.nrows() != sequence.len() {
        return Err(StateError::shape(
            "state-map timepoints",
            activity.nrows(),
            sequence.len(),
        ));
    }

    let states = labels.labels();
    let regions = activity.ncols();
    let mut sums = Array2::<f64>::zeros((states.len(), regions));
    let mut counts = vec![0usize; states.len()];

    for (row, &code) in activity.axis_iter(Axis(0)).zip(sequence.as_slice()) {
        let Some(slot) = usize::try_from(code)
            .ok()
            .and_then(|c| c.checked_sub(1))
            .filter(|&i| i < states.len())
        else {
            continue;
        };
        let mut acc = sums.row_mut(slot);
        acc += &row;
        counts[slot] += 1;
    }

    Ok(states
        .into_iter()
        .zip(sums.axis_iter(Axis(0)))
        .zip(counts)
        .map(|((state, sum), occurrences)| StateMap {
            state,
            occurrences,
            values: if occurrences > 0 {
                sum.mapv(|v| v / occurrences as f64)
            } else {
                Array1::zeros(regions)
            },
        })
        .collect())
}

/// One row of the cohort state-map table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMapRow {
    #[serde(rename = "ROI")]
    pub region: u32,
    pub network_id: u32,
    pub subject: SubjectId,
    pub state: String,
    pub value: f64,
}

/// Cohort-level table of state maps keyed by (subject, state, region)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateMapTable {
    rows: Vec<StateMapRow>,
}

impl StateMapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[StateMapRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a subject's maps, one row per (state, region).
    ///
    /// Maps that are entirely NaN are skipped rather than stored.
    pub fn push_subject(
        &mut self,
        subject: SubjectId,
        maps: &[StateMap],
        map: &RegionNetworkMap,
    ) -> Result<()> {
        for state_map in maps {
            if state_map.values.len() != map.len() {
                return Err(StateError::shape(
                    format!("state map {} of subject {subject}", state_map.state),
                    map.len(),
                    state_map.values.len(),
                ));
            }
            if state_map.values.iter().all(|v| v.is_nan()) {
                debug!(
                    target: "netstate::state_maps",
                    subject,
                    state = state_map.state.name(),
                    "skipping all-NaN state map"
                );
                continue;
            }
            self.rows.extend(map.entries().iter().zip(state_map.values.iter()).map(
                |(entry, &value)| StateMapRow {
                    region: entry.region,
                    network_id: entry.network_id,
                    subject,
                    state: state_map.state.name().to_string(),
                    value,
                },
            ));
        }
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_writer(File::create(path)?);
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a table; a missing file is a recoverable missing input
    pub fn read_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StateError::MissingInput {
                kind: "state map",
                path: path.to_path_buf(),
            });
        }
        let mut reader = csv::Reader::from_reader(File::open(path)?);
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<StateMapRow>, csv::Error>>()?;
        Ok(Self { rows })
    }

    /// Subjects present in the table, in first-appearance order
    pub fn subjects(&self) -> Vec<SubjectId> {
        let mut subjects: Vec<SubjectId> = Vec::new();
        for row in &self.rows {
            if subjects.last() != Some(&row.subject) && !subjects.contains(&row.subject) {
                subjects.push(row.subject);
            }
        }
        subjects
    }

    /// Build a (regions x states) matrix of a subject's network states.
    ///
    /// States follow `labels` order and only networks present for the subject
    /// are included; the reject state is never part of it. Returns `None`
    /// when the subject has no rows.
    pub fn subject_states(
        &self,
        subject: SubjectId,
        labels: &LabelSet,
        regions: usize,
    ) -> Result<Option<(Vec<Network>, Array2<f64>)>> {
        let subject_rows: Vec<&StateMapRow> =
            self.rows.iter().filter(|r| r.subject == subject).collect();
        if subject_rows.is_empty() {
            return Ok(None);
        }

        let present: Vec<Network> = labels
            .networks()
            .iter()
            .copied()
            .filter(|n| subject_rows.iter().any(|r| r.state == n.as_str()))
            .collect();

        let mut states = Array2::<f64>::zeros((regions, present.len()));
        for (column, network) in present.iter().enumerate() {
            let values: Vec<f64> = subject_rows
                .iter()
                .filter(|r| r.state == network.as_str())
                .map(|r| r.value)
                .collect();
            if values.len() != regions {
                return Err(StateError::shape(
                    format!("state {network} of subject {subject}"),
                    regions,
                    values.len(),
                ));
            }
            states.column_mut(column).assign(&Array1::from(values));
        }

        Ok(Some((present, states)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegionAssignment;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn setup() -> (LabelSet, RegionNetworkMap) {
        let labels = LabelSet::new(vec![Network::Visual, Network::Default]).unwrap();
        let map = RegionNetworkMap::new(
            vec![
                RegionAssignment { region: 1, network_id: 1 },
                RegionAssignment { region: 2, network_id: 2 },
            ],
            &labels,
        )
        .unwrap();
        (labels, map)
    }

    #[test]
    fn test_state_maps_average_assigned_timepoints() {
        let (labels, _) = setup();
        let activity = array![[1.0, 0.0], [3.0, 2.0], [0.0, 5.0]];
        let sequence = LabelSequence::new(vec![1, 1, 2]);

        let maps = subject_state_maps(&activity, &sequence, &labels).unwrap();

        assert_eq!(maps.len(), 3);
        assert_eq!(maps[0].state, StateLabel::Network(Network::Visual));
        assert_eq!(maps[0].occurrences, 2);
        assert_eq!(maps[0].values, array![2.0, 1.0]);
        assert_eq!(maps[1].values, array![0.0, 5.0]);
        assert_eq!(maps[2].state, StateLabel::Reject);
        assert_eq!(maps[2].occurrences, 0);
        assert_eq!(maps[2].values, array![0.0, 0.0]);
    }

    #[test]
    fn test_length_mismatch_is_recoverable() {
        let (labels, _) = setup();
        let activity = array![[1.0, 0.0]];
        let sequence = LabelSequence::new(vec![1, 2]);
        let err = subject_state_maps(&activity, &sequence, &labels).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_table_rows_and_nan_skip() {
        let (labels, map) = setup();
        let activity = array![[1.0, 0.0], [0.0, 2.0]];
        let sequence = LabelSequence::new(vec![1, 2]);
        let mut maps = subject_state_maps(&activity, &sequence, &labels).unwrap();
        maps[1].values = array![f64::NAN, f64::NAN];

        let mut table = StateMapTable::new();
        table.push_subject(42, &maps, &map).unwrap();

        // Vis and NOTA kept, Default skipped
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.rows()[0],
            StateMapRow {
                region: 1,
                network_id: 1,
                subject: 42,
                state: "Vis".to_string(),
                value: 1.0,
            }
        );
        assert_eq!(table.rows()[3].state, "NOTA");
    }

    #[test]
    fn test_csv_round_trip_and_subject_states() {
        let (labels, map) = setup();
        let activity = array![[1.0, 0.0], [0.0, 2.0], [2.0, 0.0]];
        let sequence = LabelSequence::new(vec![1, 2, 1]);
        let maps = subject_state_maps(&activity, &sequence, &labels).unwrap();

        let mut table = StateMapTable::new();
        table.push_subject(5, &maps, &map).unwrap();
        table.push_subject(9, &maps, &map).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state-maps_subject-level.csv");
        table.write_csv(&path).unwrap();

        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("ROI,network_id,subject,state,value"));

        let back = StateMapTable::read_csv(&path).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.subjects(), vec![5, 9]);

        let (present, states) = back.subject_states(9, &labels, 2).unwrap().unwrap();
        assert_eq!(present, vec![Network::Visual, Network::Default]);
        assert_eq!(states, array![[1.5, 0.0], [0.0, 2.0]]);

        assert!(back.subject_states(77, &labels, 2).unwrap().is_none());
        assert!(back.subject_states(9, &labels, 3).unwrap_err().is_recoverable());
    }

    #[test]
    fn test_missing_table_is_recoverable() {
        let err = StateMapTable::read_csv(Path::new("/nonexistent/state-maps.csv")).unwrap_err();
        assert!(err.is_recoverable());
    }
}
