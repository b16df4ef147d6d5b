//! Energy summary metrics
//!
//! Summarizes a subject's (states x states) control-energy matrix:
//! transition energy between distinct states, persistence energy on the
//! diagonal and a global stability index derived from persistence.

use crate::error::{Result, StateError};
use crate::types::SubjectId;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Summary of one subject's energy matrix
#[derive(Debug, Clone, PartialEq)]
pub struct EnergySummary {
    /// All entries, row-major (`TE_1 .. TE_{n*n}`)
    pub transitions: Vec<f64>,
    /// Mean of off-diagonal entries
    pub average_transition: f64,
    /// Mean of diagonal entries
    pub average_persistence: f64,
    /// `1 / log10(average_persistence)`; undefined for non-positive persistence
    pub global_stability: Option<f64>,
}

impl EnergySummary {
    pub fn from_matrix(matrix: &Array2<f64>) -> Result<Self> {
        let (rows, cols) = matrix.dim();
        if rows != cols || rows == 0 {
            return Err(StateError::shape("energy matrix columns", rows, cols));
        }

        let transitions: Vec<f64> = matrix.iter().copied().collect();
        let persistence: f64 = matrix.diag().sum();
        let average_persistence = persistence / rows as f64;
        let off_diagonal = rows * rows - rows;
        let average_transition = if off_diagonal > 0 {
            (matrix.sum() - persistence) / off_diagonal as f64
        } else {
            f64::NAN
        };
        let global_stability = if average_persistence > 0.0 {
            Some(1.0 / average_persistence.log10())
        } else {
            None
        };

        Ok(Self {
            transitions,
            average_transition,
            average_persistence,
            global_stability,
        })
    }
}

/// One row of an energy summary table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyRow {
    pub subject_id: SubjectId,
    pub condition: String,
    pub state_k: String,
    pub value: f64,
}

/// Long-format tables accumulated across cohorts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyTables {
    pub transitions: Vec<EnergyRow>,
    pub average_transition: Vec<EnergyRow>,
    pub average_persistence: Vec<EnergyRow>,
    pub global_stability: Vec<EnergyRow>,
}

impl EnergyTables {
    pub fn push(&mut self, subject: SubjectId, condition: &str, summary: &EnergySummary) {
        let row = |state_k: String, value: f64| EnergyRow {
            subject_id: subject,
            condition: condition.to_string(),
            state_k,
            value,
        };

        self.transitions.extend(
            summary
                .transitions
                .iter()
                .enumerate()
                .map(|(k, &value)| row(format!("TE_{}", k + 1), value)),
        );
        self.average_transition
            .push(row("ave_TE".to_string(), summary.average_transition));
        self.average_persistence
            .push(row("ave_PE".to_string(), summary.average_persistence));
        self.global_stability.push(row(
            "global_stability".to_string(),
            summary.global_stability.unwrap_or(f64::NAN),
        ));
    }

    /// (file stem, rows) pairs for writing
    pub fn named(&self, tag: &str) -> [(String, &[EnergyRow]); 4] {
        [
            (format!("df_oce_{tag}"), self.transitions.as_slice()),
            (format!("df_aveTE_{tag}"), self.average_transition.as_slice()),
            (format!("df_avePE_{tag}"), self.average_persistence.as_slice()),
            (format!("df_global_stability_{tag}"), self.global_stability.as_slice()),
        ]
    }
}
