//! Label-set harmonization
//!
//! Two mechanisms make differently configured analyses comparable:
//! - excluding a network before classification (its regions are dropped and
//!   the surviving networks are renumbered contiguously), and
//! - stripping the trailing reject slot from computed metrics so that a
//!   reject-inclusive run lines up with a reject-exclusive one.

use crate::error::{Result, StateError};
use crate::types::{LabelSet, Network, RegionAssignment, RegionNetworkMap, StateSpace};
use ndarray::{s, Array2, Array3};

/// Remove `network` from a configuration.
///
/// Returns the reduced label set and a map that no longer contains the
/// excluded network's regions, with survivors renumbered to `1..=K-1` in
/// their original relative order.
pub fn exclude_network(
    labels: &LabelSet,
    map: &RegionNetworkMap,
    network: Network,
) -> Result<(LabelSet, RegionNetworkMap)> {
    let excluded_id = labels.id_of(network).ok_or_else(|| {
        StateError::UnknownNetwork(format!("{network} is not part of the label set"))
    })?;
    let reduced = labels.without(network)?;

    let entries = map
        .entries()
        .iter()
        .filter(|e| e.network_id != excluded_id)
        .map(|e| {
            let survivor = labels.network_of(e.network_id).and_then(|n| reduced.id_of(n));
            survivor
                .map(|network_id| RegionAssignment {
                    region: e.region,
                    network_id,
                })
                .ok_or_else(|| {
                    StateError::InvalidMapping(format!(
                        "region {} has no surviving network",
                        e.region
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let reduced_map = RegionNetworkMap::new(entries, &reduced)?;
    Ok((reduced, reduced_map))
}

/// Drop the last state row from a (states x subjects) matrix
pub fn strip_reject_rows(space: &StateSpace, values: &Array2<f64>) -> Result<Array2<f64>> {
    check_reject_slot(space, values.nrows(), "state vector")?;
    Ok(values.slice(s![..-1, ..]).to_owned())
}

/// Drop the last row and column from a (subjects x states x states) tensor
pub fn strip_reject_transitions(space: &StateSpace, values: &Array3<f64>) -> Result<Array3<f64>> {
    let (_, rows, cols) = values.dim();
    check_reject_slot(space, rows, "transition rows")?;
    check_reject_slot(space, cols, "transition columns")?;
    Ok(values.slice(s![.., ..-1, ..-1]).to_owned())
}

fn check_reject_slot(space: &StateSpace, len: usize, context: &str) -> Result<()> {
    if !space.has_reject_slot() {
        return Err(StateError::InvalidLabelSet(format!(
            "{context} has no reject slot to strip"
        )));
    }
    if len != space.n_states() {
        return Err(StateError::InvalidLabelSet(format!(
            "{context} has {len} states but the state space tracks {}",
            space.n_states()
        )));
    }
    Ok(())
}
