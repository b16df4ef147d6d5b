//! Control-task assembly
//!
//! Builds the inputs an external network-control solver needs to estimate the
//! energy of moving between brain states: unit-norm initial and target state
//! vectors for every ordered pair of states, the control input matrix, the
//! trajectory constraint matrix and the weighting scalar. The solver itself
//! sits behind [`ControlEnergySolver`].

use crate::error::{Result, StateError};
use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use ndarray_npy::NpzWriter;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Default weighting between control energy and state deviation
pub const DEFAULT_RHO: f64 = 1.0;

/// One x0 -> xf transition task
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTask {
    pub x0: Array1<f64>,
    pub xf: Array1<f64>,
    /// Control input matrix (B)
    pub control_set: Arc<Array2<f64>>,
    /// Trajectory constraints (S)
    pub constraints: Arc<Array2<f64>>,
    pub rho: f64,
}

/// External optimal-control collaborator
pub trait ControlEnergySolver {
    /// Return one energy value per task, in task order
    fn energies(&self, adjacency: &Array2<f64>, tasks: &[ControlTask]) -> Result<Vec<f64>>;
}

/// Scale a state vector to unit L2 norm; the zero vector stays zero
pub fn normalize_state(state: ArrayView1<f64>) -> Array1<f64> {
    let norm = state.dot(&state).sqrt();
    if norm > 0.0 {
        state.mapv(|v| v / norm)
    } else {
        state.to_owned()
    }
}

/// Full control: B = I
pub fn uniform_control_set(regions: usize) -> Array2<f64> {
    Array2::eye(regions)
}

/// Identity control set with region `k` weighted twice as strongly
pub fn regional_control_set(regions: usize, k: usize) -> Result<Array2<f64>> {
    if k >= regions {
        return Err(StateError::shape("perturbed region", regions, k + 1));
    }
    let mut control = Array2::eye(regions);
    control[[k, k]] = 2.0;
    Ok(control)
}

/// Restrict a structural connectivity matrix to `regions` (0-based indices,
/// in state-vector order) and remove self-loops
pub fn prepare_adjacency(raw: &Array2<f64>, regions: &[usize]) -> Result<Array2<f64>> {
    let (rows, cols) = raw.dim();
    let needed = regions.iter().map(|&r| r + 1).max().unwrap_or(0);
    if rows < needed || cols < needed {
        return Err(StateError::shape(
            "connectivity regions",
            needed,
            rows.min(cols),
        ));
    }
    let mut adjacency = raw.select(Axis(0), regions).select(Axis(1), regions);
    adjacency.diag_mut().fill(0.0);
    Ok(adjacency)
}

/// Build every ordered (initial, target) task over the columns of `states`.
///
/// `states` is (regions x states); tasks are ordered initial-major, so task
/// `i * n + j` moves from state `i` to state `j`.
pub fn assemble_control_tasks(
    states: &Array2<f64>,
    control_set: Array2<f64>,
    rho: f64,
) -> Result<Vec<ControlTask>> {
    let regions = states.nrows();
    if control_set.dim() != (regions, regions) {
        return Err(StateError::shape(
            "control set",
            regions,
            control_set.nrows(),
        ));
    }

    let control_set = Arc::new(control_set);
    let constraints = Arc::new(Array2::eye(regions));
    let normalized: Vec<Array1<f64>> = states.axis_iter(Axis(1)).map(normalize_state).collect();

    let mut tasks = Vec::with_capacity(normalized.len() * normalized.len());
    for x0 in &normalized {
        for xf in &normalized {
            tasks.push(ControlTask {
                x0: x0.clone(),
                xf: xf.clone(),
                control_set: Arc::clone(&control_set),
                constraints: Arc::clone(&constraints),
                rho,
            });
        }
    }
    Ok(tasks)
}

/// Run the solver and reshape its output to (states x states)
pub fn energy_matrix(
    solver: &dyn ControlEnergySolver,
    adjacency: &Array2<f64>,
    tasks: &[ControlTask],
    n_states: usize,
) -> Result<Array2<f64>> {
    let energies = solver.energies(adjacency, tasks)?;
    if energies.len() != n_states * n_states {
        return Err(StateError::shape(
            "solver energies",
            n_states * n_states,
            energies.len(),
        ));
    }
    Array2::from_shape_vec((n_states, n_states), energies)
        .map_err(|e| StateError::ParseError(format!("energy matrix: {e}")))
}

/// Energy matrices with each region's control weight doubled in turn.
///
/// Output is (regions x states x states).
pub fn regional_energies(
    solver: &dyn ControlEnergySolver,
    adjacency: &Array2<f64>,
    states: &Array2<f64>,
    rho: f64,
) -> Result<Array3<f64>> {
    let regions = states.nrows();
    let n_states = states.ncols();
    let mut energies = Array3::<f64>::zeros((regions, n_states, n_states));

    for k in 0..regions {
        let tasks = assemble_control_tasks(states, regional_control_set(regions, k)?, rho)?;
        let matrix = energy_matrix(solver, adjacency, &tasks, n_states)?;
        energies.index_axis_mut(Axis(0), k).assign(&matrix);
    }
    Ok(energies)
}

/// Persist a task set for an external solver.
///
/// The container holds `A` (adjacency), `x0` and `xf` (tasks x regions),
/// `B`, `S` and `rho` (shared by every task).
pub fn write_task_bundle(path: &Path, adjacency: &Array2<f64>, tasks: &[ControlTask]) -> Result<()> {
    let first = tasks
        .first()
        .ok_or_else(|| StateError::InvalidConfig("no control tasks to write".to_string()))?;
    let regions = first.x0.len();

    let mut x0 = Array2::<f64>::zeros((tasks.len(), regions));
    let mut xf = Array2::<f64>::zeros((tasks.len(), regions));
    for (i, task) in tasks.iter().enumerate() {
        x0.row_mut(i).assign(&task.x0);
        xf.row_mut(i).assign(&task.xf);
    }

    let mut npz = NpzWriter::new(File::create(path)?);
    npz.add_array("A", adjacency)?;
    npz.add_array("x0", &x0)?;
    npz.add_array("xf", &xf)?;
    npz.add_array("B", first.control_set.as_ref())?;
    npz.add_array("S", first.constraints.as_ref())?;
    npz.add_array("rho", &ndarray::arr0(first.rho))?;
    npz.finish()?;
    Ok(())
}
