//! Core types for the netstate pipeline
//!
//! This module defines the data structures shared by every stage: the closed
//! network enumeration, per-timepoint state labels, the ordered label set of a
//! configuration, the region-to-network map and persisted label sequences.

use crate::error::{Result, StateError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subject identifier as listed in cohort subject-list files
pub type SubjectId = u64;

/// Name written for the reject ("none of the above") state
pub const REJECT_NAME: &str = "NOTA";

/// Canonical resting-state networks (7-network cortical parcellation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Network {
    #[serde(rename = "Vis")]
    Visual,
    #[serde(rename = "SomMot")]
    SomatoMotor,
    #[serde(rename = "DorsAttn")]
    DorsalAttention,
    #[serde(rename = "VentAttn")]
    VentralAttention,
    #[serde(rename = "Limbic")]
    Limbic,
    #[serde(rename = "Frontoparietal")]
    Frontoparietal,
    #[serde(rename = "Default")]
    Default,
}

impl Network {
    /// All networks in canonical order
    pub const ALL: [Network; 7] = [
        Network::Visual,
        Network::SomatoMotor,
        Network::DorsalAttention,
        Network::VentralAttention,
        Network::Limbic,
        Network::Frontoparietal,
        Network::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Visual => "Vis",
            Network::SomatoMotor => "SomMot",
            Network::DorsalAttention => "DorsAttn",
            Network::VentralAttention => "VentAttn",
            Network::Limbic => "Limbic",
            Network::Frontoparietal => "Frontoparietal",
            Network::Default => "Default",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        let alias = match wanted.as_str() {
            "visual" => Some(Network::Visual),
            "somatomotor" => Some(Network::SomatoMotor),
            "dorsalattention" | "dan" => Some(Network::DorsalAttention),
            "ventralattention" | "van" | "salience" => Some(Network::VentralAttention),
            "fpn" | "control" => Some(Network::Frontoparietal),
            "dmn" => Some(Network::Default),
            _ => None,
        };
        alias
            .or_else(|| {
                Network::ALL
                    .into_iter()
                    .find(|n| n.as_str().eq_ignore_ascii_case(&wanted))
            })
            .ok_or_else(|| StateError::UnknownNetwork(s.to_string()))
    }
}

/// Dominant state assigned to a single timepoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateLabel {
    /// A network reached the activation threshold and had the highest mean
    Network(Network),
    /// No network reached the activation threshold
    Reject,
}

impl StateLabel {
    pub fn name(&self) -> &'static str {
        match self {
            StateLabel::Network(n) => n.as_str(),
            StateLabel::Reject => REJECT_NAME,
        }
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, StateLabel::Reject)
    }
}

impl fmt::Display for StateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered networks of one analysis configuration.
///
/// Network identifiers are 1-based positions in this list. The reject state is
/// not stored: it always encodes as `network_count() + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Network>", into = "Vec<Network>")]
pub struct LabelSet {
    networks: Vec<Network>,
}

impl LabelSet {
    pub fn new(networks: Vec<Network>) -> Result<Self> {
        if networks.is_empty() {
            return Err(StateError::InvalidLabelSet(
                "at least one network is required".to_string(),
            ));
        }
        for (i, network) in networks.iter().enumerate() {
            if networks[..i].contains(network) {
                return Err(StateError::InvalidLabelSet(format!(
                    "network {network} listed twice"
                )));
            }
        }
        Ok(Self { networks })
    }

    /// The seven canonical networks
    pub fn canonical() -> Self {
        Self {
            networks: Network::ALL.to_vec(),
        }
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    /// Number of non-reject networks
    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    /// Identifier written for the reject state
    pub fn reject_id(&self) -> u32 {
        self.networks.len() as u32 + 1
    }

    pub fn contains(&self, network: Network) -> bool {
        self.networks.contains(&network)
    }

    pub fn id_of(&self, network: Network) -> Option<u32> {
        self.networks
            .iter()
            .position(|n| *n == network)
            .map(|p| p as u32 + 1)
    }

    pub fn network_of(&self, id: u32) -> Option<Network> {
        (id as usize)
            .checked_sub(1)
            .and_then(|i| self.networks.get(i))
            .copied()
    }

    pub fn encode(&self, label: StateLabel) -> Option<u32> {
        match label {
            StateLabel::Network(n) => self.id_of(n),
            StateLabel::Reject => Some(self.reject_id()),
        }
    }

    pub fn decode(&self, id: i64) -> Option<StateLabel> {
        let id = u32::try_from(id).ok()?;
        if id == self.reject_id() {
            return Some(StateLabel::Reject);
        }
        self.network_of(id).map(StateLabel::Network)
    }

    /// Every label in identifier order, reject last
    pub fn labels(&self) -> Vec<StateLabel> {
        self.networks
            .iter()
            .copied()
            .map(StateLabel::Network)
            .chain(std::iter::once(StateLabel::Reject))
            .collect()
    }

    /// Label set with `network` removed; survivors keep their relative order
    pub fn without(&self, network: Network) -> Result<Self> {
        if !self.contains(network) {
            return Err(StateError::UnknownNetwork(format!(
                "{network} is not part of the label set"
            )));
        }
        Self::new(
            self.networks
                .iter()
                .copied()
                .filter(|n| *n != network)
                .collect(),
        )
    }
}

impl TryFrom<Vec<Network>> for LabelSet {
    type Error = StateError;

    fn try_from(networks: Vec<Network>) -> Result<Self> {
        Self::new(networks)
    }
}

impl From<LabelSet> for Vec<Network> {
    fn from(set: LabelSet) -> Self {
        set.networks
    }
}

/// State dimension used by the metrics engine.
///
/// With a reject slot the engine tracks `K + 1` states and the reject state is
/// structurally the last one; without it, reject timepoints fall outside the
/// tracked range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSpace {
    labels: LabelSet,
    reject_slot: bool,
}

impl StateSpace {
    pub fn new(labels: LabelSet, reject_slot: bool) -> Self {
        Self {
            labels,
            reject_slot,
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn has_reject_slot(&self) -> bool {
        self.reject_slot
    }

    pub fn n_states(&self) -> usize {
        self.labels.network_count() + usize::from(self.reject_slot)
    }

    /// Tracked states in row/column order
    pub fn states(&self) -> Vec<StateLabel> {
        let mut states: Vec<StateLabel> = self
            .labels
            .networks()
            .iter()
            .copied()
            .map(StateLabel::Network)
            .collect();
        if self.reject_slot {
            states.push(StateLabel::Reject);
        }
        states
    }

    /// The same space with the reject slot removed
    pub fn without_reject_slot(&self) -> Result<Self> {
        if !self.reject_slot {
            return Err(StateError::InvalidLabelSet(
                "state space has no reject slot to strip".to_string(),
            ));
        }
        Ok(Self::new(self.labels.clone(), false))
    }
}

/// One row of the region-to-network reference table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionAssignment {
    /// 1-based region identifier (column `ROI`)
    #[serde(rename = "ROI")]
    pub region: u32,
    /// 1-based network identifier
    pub network_id: u32,
}

/// Validated region-to-network mapping for one label set.
///
/// Entry order defines the column order of projected activity matrices and of
/// state maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionNetworkMap {
    entries: Vec<RegionAssignment>,
    network_count: usize,
}

impl RegionNetworkMap {
    pub fn new(entries: Vec<RegionAssignment>, labels: &LabelSet) -> Result<Self> {
        let network_count = labels.network_count();
        let mut seen = std::collections::HashSet::with_capacity(entries.len());
        let mut populated = vec![false; network_count];

        for entry in &entries {
            if entry.region == 0 {
                return Err(StateError::InvalidMapping(
                    "region identifiers are 1-based".to_string(),
                ));
            }
            if !seen.insert(entry.region) {
                return Err(StateError::InvalidMapping(format!(
                    "region {} assigned more than once",
                    entry.region
                )));
            }
            if entry.network_id == 0 || entry.network_id as usize > network_count {
                return Err(StateError::InvalidMapping(format!(
                    "region {} points to network {} outside 1..={}",
                    entry.region, entry.network_id, network_count
                )));
            }
            populated[entry.network_id as usize - 1] = true;
        }

        if let Some(empty) = populated.iter().position(|p| !p) {
            return Err(StateError::InvalidMapping(format!(
                "network {} ({}) has no regions",
                empty + 1,
                labels.networks()[empty]
            )));
        }

        Ok(Self {
            entries,
            network_count,
        })
    }

    pub fn entries(&self) -> &[RegionAssignment] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn network_count(&self) -> usize {
        self.network_count
    }

    /// Column positions (into the projected matrix) of each network's regions
    pub fn network_members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.network_count];
        for (column, entry) in self.entries.iter().enumerate() {
            members[entry.network_id as usize - 1].push(column);
        }
        members
    }

    /// Select the mapped regions' columns from a raw (time x region) matrix
    pub fn project(&self, raw: &Array2<f64>) -> Result<Array2<f64>> {
        let needed = self
            .entries
            .iter()
            .map(|e| e.region as usize)
            .max()
            .unwrap_or(0);
        if raw.ncols() < needed {
            return Err(StateError::shape("activity columns", needed, raw.ncols()));
        }
        let columns: Vec<usize> = self.entries.iter().map(|e| e.region as usize - 1).collect();
        Ok(raw.select(ndarray::Axis(1), &columns))
    }
}

/// Per-timepoint state identifiers (1-based) for one subject
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSequence(Vec<i64>);

impl LabelSequence {
    pub fn new(codes: Vec<i64>) -> Self {
        Self(codes)
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<i64> {
        self.0
    }
}

impl From<Vec<i64>> for LabelSequence {
    fn from(codes: Vec<i64>) -> Self {
        Self(codes)
    }
}
