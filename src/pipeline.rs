//! Pipeline orchestration
//!
//! [`StatePipeline`] drives every configured variant over every cohort:
//!
//! 1. extraction: activity CSV → projection → z-score → dominant-state
//!    labels → state maps, one subject per rayon task
//! 2. dynamics: persisted labels → per-subject metrics → group tensors,
//!    stacked in subject-list order and written as one `.npz` per variant
//!
//! Subject-level failures that [`StateError::is_recoverable`] accepts are
//! logged and skipped; anything else aborts the run.

use crate::classifier::DominantStateClassifier;
use crate::config::{CohortConfig, PipelineConfig, VariantConfig};
use crate::control::{self, ControlEnergySolver};
use crate::dynamics::{GroupDynamics, SubjectDynamics};
use crate::energy::{EnergySummary, EnergyTables};
use crate::error::{Result, StateError};
use crate::harmonizer;
use crate::io;
use crate::normalizer::Normalizer;
use crate::state_maps::{subject_state_maps, StateMap, StateMapTable};
use crate::types::{LabelSet, Network, RegionAssignment, RegionNetworkMap, StateSpace, SubjectId};
use crate::NETSTATE_VERSION;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Array3};
use ndarray_npy::NpzWriter;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const STATE_MAP_FILE: &str = "state-maps_subject-level.csv";

/// A subject left out of a cohort result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSubject {
    pub subject: SubjectId,
    pub reason: String,
}

/// Outcome of one stage for one cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortReport {
    pub cohort: String,
    /// Subjects that contributed, in subject-list order
    pub processed: Vec<SubjectId>,
    pub skipped: Vec<SkippedSubject>,
}

impl CohortReport {
    fn new(cohort: &str) -> Self {
        Self {
            cohort: cohort.to_string(),
            processed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Sort one subject's outcome; fatal errors are passed back to the caller
    fn record<T>(&mut self, subject: SubjectId, outcome: Result<T>) -> Result<Option<T>> {
        match outcome {
            Ok(value) => {
                self.processed.push(subject);
                Ok(Some(value))
            }
            Err(e) if e.is_recoverable() => {
                warn!(
                    target: "netstate::pipeline",
                    cohort = self.cohort.as_str(),
                    subject,
                    error = %e,
                    "skipping subject"
                );
                self.skipped.push(SkippedSubject {
                    subject,
                    reason: e.to_string(),
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Provenance record written next to each metrics container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub version: String,
    pub variant: String,
    /// State names along the state axis of every array
    pub states: Vec<String>,
    pub container: PathBuf,
    pub cohorts: Vec<CohortReport>,
}

/// A variant resolved against the reference map
#[derive(Debug, Clone)]
pub struct PreparedVariant {
    pub name: String,
    pub config: VariantConfig,
    pub map: RegionNetworkMap,
    pub classifier: DominantStateClassifier,
}

impl PreparedVariant {
    pub fn labels(&self) -> &LabelSet {
        self.classifier.labels()
    }

    /// State space the metrics engine counts over
    pub fn space(&self) -> StateSpace {
        StateSpace::new(self.labels().clone(), self.config.has_reject_slot())
    }
}

/// Group/condition orchestrator
pub struct StatePipeline {
    config: PipelineConfig,
    map: RegionNetworkMap,
    pool: rayon::ThreadPool,
}

impl StatePipeline {
    /// Validate the configuration and load the reference network map
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let entries = io::read_network_map(&config.network_map)?;
        Self::with_map_entries(config, entries)
    }

    /// Build a pipeline from already loaded map entries
    pub fn with_map_entries(config: PipelineConfig, entries: Vec<RegionAssignment>) -> Result<Self> {
        config.validate()?;
        let map = RegionNetworkMap::new(entries, &config.networks)?;
        if map.len() != config.region_count {
            return Err(StateError::InvalidMapping(format!(
                "expected {} regions, map has {}",
                config.region_count,
                map.len()
            )));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.unwrap_or(0))
            .build()
            .map_err(|e| StateError::InvalidConfig(format!("worker pool: {e}")))?;

        Ok(Self { config, map, pool })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn map(&self) -> &RegionNetworkMap {
        &self.map
    }

    /// Apply network exclusion and build the classifier for `variant`
    pub fn prepare_variant(&self, variant: &VariantConfig) -> Result<PreparedVariant> {
        let (labels, map) = match variant.excluded_network {
            Some(network) => harmonizer::exclude_network(&self.config.networks, &self.map, network)?,
            None => (self.config.networks.clone(), self.map.clone()),
        };
        let classifier = DominantStateClassifier::new(labels, &map, variant.activation_threshold)?;
        Ok(PreparedVariant {
            name: variant.name(),
            config: variant.clone(),
            map,
            classifier,
        })
    }

    /// Find a configured variant by its directory name
    pub fn variant(&self, name: &str) -> Result<&VariantConfig> {
        self.config
            .variants
            .iter()
            .find(|v| v.name() == name)
            .ok_or_else(|| StateError::InvalidConfig(format!("unknown variant {name}")))
    }

    pub fn cohort(&self, name: &str) -> Result<&CohortConfig> {
        self.config
            .cohorts
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StateError::InvalidConfig(format!("unknown cohort {name}")))
    }

    pub fn variant_dir(&self, cohort: &str, variant: &str) -> PathBuf {
        self.config.output_dir.join(cohort).join(variant)
    }

    pub fn labels_path(&self, cohort: &str, variant: &str, subject: SubjectId) -> PathBuf {
        self.variant_dir(cohort, variant)
            .join(format!("{subject}_dominance_network_labels.npy"))
    }

    pub fn state_map_path(&self, cohort: &str, variant: &str) -> PathBuf {
        self.variant_dir(cohort, variant).join(STATE_MAP_FILE)
    }

    pub fn metrics_path(&self, variant: &str) -> PathBuf {
        self.config
            .output_dir
            .join("metrics")
            .join(format!("states_{variant}_fo_dt_ar_tp.npz"))
    }

    pub fn manifest_path(&self, variant: &str) -> PathBuf {
        self.config
            .output_dir
            .join("metrics")
            .join(format!("states_{variant}_manifest.json"))
    }

    /// Extract labels and state maps for every variant and cohort
    pub fn extract(&self) -> Result<Vec<CohortReport>> {
        let mut reports = Vec::new();
        for variant in &self.config.variants {
            let prepared = self.prepare_variant(variant)?;
            for cohort in &self.config.cohorts {
                reports.push(self.extract_cohort(cohort, &prepared)?);
            }
        }
        Ok(reports)
    }

    /// Compute and persist group dynamics for every variant
    pub fn dynamics(&self) -> Result<Vec<RunManifest>> {
        self.config
            .variants
            .iter()
            .map(|variant| {
                let prepared = self.prepare_variant(variant)?;
                self.dynamics_variant(&prepared)
            })
            .collect()
    }

    /// Extraction followed by dynamics
    pub fn run(&self) -> Result<Vec<RunManifest>> {
        self.extract()?;
        self.dynamics()
    }

    /// Classify every subject of a cohort and write the cohort state-map table
    pub fn extract_cohort(
        &self,
        cohort: &CohortConfig,
        prepared: &PreparedVariant,
    ) -> Result<CohortReport> {
        let subjects = io::read_subject_list(&cohort.subject_list)?;
        io::ensure_dir(&self.variant_dir(&cohort.name, &prepared.name))?;

        info!(
            target: "netstate::pipeline",
            cohort = cohort.name.as_str(),
            variant = prepared.name.as_str(),
            subjects = subjects.len(),
            "extracting dominant states"
        );

        let outcomes: Vec<(SubjectId, Result<Vec<StateMap>>)> = self.pool.install(|| {
            subjects
                .par_iter()
                .map(|&subject| (subject, self.extract_subject(cohort, prepared, subject)))
                .collect()
        });

        let mut report = CohortReport::new(&cohort.name);
        let mut table = StateMapTable::new();
        for (subject, outcome) in outcomes {
            if let Some(maps) = report.record(subject, outcome)? {
                table.push_subject(subject, &maps, &prepared.map)?;
            }
        }
        table.write_csv(&self.state_map_path(&cohort.name, &prepared.name))?;

        info!(
            target: "netstate::pipeline",
            cohort = cohort.name.as_str(),
            variant = prepared.name.as_str(),
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            "extraction complete"
        );
        Ok(report)
    }

    fn extract_subject(
        &self,
        cohort: &CohortConfig,
        prepared: &PreparedVariant,
        subject: SubjectId,
    ) -> Result<Vec<StateMap>> {
        // A label file left by an earlier run must not outlive a failed re-extraction
        let labels_path = self.labels_path(&cohort.name, &prepared.name, subject);
        if labels_path.exists() {
            fs::remove_file(&labels_path)?;
        }

        let path = cohort.activity_dir.join(format!("{subject}_bold.csv"));
        let raw = io::read_numeric_csv(&path, "activity")?;
        let projected = prepared.map.project(&raw)?;

        let normalized = Normalizer::zscore(&projected);
        if !normalized.constant_regions.is_empty() {
            warn!(
                target: "netstate::normalizer",
                cohort = cohort.name.as_str(),
                subject,
                regions = normalized.constant_regions.len(),
                "constant regions set to zero"
            );
        }

        let sequence = prepared.classifier.classify(&normalized.values)?;
        io::write_labels(&labels_path, &sequence)?;
        debug!(
            target: "netstate::classifier",
            cohort = cohort.name.as_str(),
            subject,
            timepoints = sequence.len(),
            "labels written"
        );

        subject_state_maps(&normalized.values, &sequence, prepared.labels())
    }

    /// Stack one cohort's metrics from its persisted label files
    pub fn dynamics_cohort(
        &self,
        cohort: &CohortConfig,
        prepared: &PreparedVariant,
    ) -> Result<(GroupDynamics, CohortReport)> {
        let subjects = io::read_subject_list(&cohort.subject_list)?;
        let space = prepared.space();
        let n_states = space.n_states();

        let outcomes: Vec<(SubjectId, Result<SubjectDynamics>)> = self.pool.install(|| {
            subjects
                .par_iter()
                .map(|&subject| {
                    let path = self.labels_path(&cohort.name, &prepared.name, subject);
                    let outcome = io::read_labels(&path).and_then(|sequence| {
                        if sequence.len() != self.config.total_timepoints {
                            return Err(StateError::shape(
                                format!("label sequence of subject {subject}"),
                                self.config.total_timepoints,
                                sequence.len(),
                            ));
                        }
                        Ok(SubjectDynamics::compute(
                            &sequence,
                            n_states,
                            self.config.sampling_interval_s,
                        ))
                    });
                    (subject, outcome)
                })
                .collect()
        });

        let mut report = CohortReport::new(&cohort.name);
        let mut results = Vec::with_capacity(outcomes.len());
        for (subject, outcome) in outcomes {
            if let Some(dynamics) = report.record(subject, outcome)? {
                results.push((subject, dynamics));
            }
        }

        let mut group = GroupDynamics::stack(space, results)?;
        if prepared.config.strip_reject && group.space().has_reject_slot() {
            group = group.without_reject()?;
        }
        Ok((group, report))
    }

    /// Compute every cohort for one variant and write its container and manifest
    pub fn dynamics_variant(&self, prepared: &PreparedVariant) -> Result<RunManifest> {
        let mut groups = Vec::with_capacity(self.config.cohorts.len());
        let mut reports = Vec::with_capacity(self.config.cohorts.len());
        for cohort in &self.config.cohorts {
            let (group, report) = self.dynamics_cohort(cohort, prepared)?;
            groups.push((cohort.name.as_str(), group));
            reports.push(report);
        }

        let container = self.metrics_path(&prepared.name);
        if let Some(parent) = container.parent() {
            io::ensure_dir(parent)?;
        }
        write_group_metrics(&container, &groups)?;

        let states = groups
            .first()
            .map(|(_, g)| g.space().states())
            .unwrap_or_else(|| prepared.space().states())
            .iter()
            .map(|s| s.name().to_string())
            .collect();

        let manifest = RunManifest {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            version: NETSTATE_VERSION.to_string(),
            variant: prepared.name.clone(),
            states,
            container,
            cohorts: reports,
        };
        fs::write(
            self.manifest_path(&prepared.name),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        info!(
            target: "netstate::pipeline",
            variant = prepared.name.as_str(),
            run_id = %manifest.run_id,
            container = %manifest.container.display(),
            "dynamics written"
        );
        Ok(manifest)
    }

    /// Load a subject's network states (regions x states) and its prepared adjacency
    fn control_inputs(
        &self,
        prepared: &PreparedVariant,
        cohort: &CohortConfig,
        subject: SubjectId,
    ) -> Result<(Vec<Network>, Array2<f64>, Array2<f64>)> {
        let connectivity_dir = cohort.connectivity_dir.as_ref().ok_or_else(|| {
            StateError::InvalidConfig(format!("cohort {} has no connectivity_dir", cohort.name))
        })?;

        let table_path = self.state_map_path(&cohort.name, &prepared.name);
        let table = StateMapTable::read_csv(&table_path)?;
        let (present, states) = table
            .subject_states(subject, prepared.labels(), prepared.map.len())?
            .ok_or(StateError::MissingInput {
                kind: "state map",
                path: table_path,
            })?;

        let raw = io::read_numeric_csv(
            &connectivity_dir.join(format!("{subject}_FA_sc.csv")),
            "connectivity",
        )?;
        let regions: Vec<usize> = prepared
            .map
            .entries()
            .iter()
            .map(|e| e.region as usize - 1)
            .collect();
        let adjacency = control::prepare_adjacency(&raw, &regions)?;
        Ok((present, adjacency, states))
    }

    /// Write the control-task bundle of one subject for an external solver
    pub fn prepare_control_tasks(
        &self,
        variant: &VariantConfig,
        cohort: &str,
        subject: SubjectId,
        rho: f64,
    ) -> Result<PathBuf> {
        let prepared = self.prepare_variant(variant)?;
        let cohort = self.cohort(cohort)?;
        let (present, adjacency, states) = self.control_inputs(&prepared, cohort, subject)?;
        let tasks = control::assemble_control_tasks(
            &states,
            control::uniform_control_set(adjacency.nrows()),
            rho,
        )?;

        let dir = self
            .config
            .output_dir
            .join("control")
            .join(&cohort.name)
            .join(&prepared.name);
        io::ensure_dir(&dir)?;
        let path = dir.join(format!("{subject}_control_tasks.npz"));
        control::write_task_bundle(&path, &adjacency, &tasks)?;

        info!(
            target: "netstate::control",
            cohort = cohort.name.as_str(),
            subject,
            states = ?present,
            tasks = tasks.len(),
            "control tasks written"
        );
        Ok(path)
    }

    /// Energy matrix (states x states) of one subject from `solver`
    pub fn subject_energy(
        &self,
        solver: &dyn ControlEnergySolver,
        variant: &VariantConfig,
        cohort: &str,
        subject: SubjectId,
        rho: f64,
    ) -> Result<(Vec<Network>, Array2<f64>)> {
        let prepared = self.prepare_variant(variant)?;
        let cohort = self.cohort(cohort)?;
        let (present, adjacency, states) = self.control_inputs(&prepared, cohort, subject)?;
        let tasks = control::assemble_control_tasks(
            &states,
            control::uniform_control_set(adjacency.nrows()),
            rho,
        )?;
        let energies = control::energy_matrix(solver, &adjacency, &tasks, present.len())?;
        Ok((present, energies))
    }

    /// Energy tensor (regions x states x states) of one subject, each slice
    /// computed with the matching region's control input raised to 1
    pub fn regional_energy(
        &self,
        solver: &dyn ControlEnergySolver,
        variant: &VariantConfig,
        cohort: &str,
        subject: SubjectId,
        rho: f64,
    ) -> Result<(Vec<Network>, Array3<f64>)> {
        let prepared = self.prepare_variant(variant)?;
        let cohort = self.cohort(cohort)?;
        let (present, adjacency, states) = self.control_inputs(&prepared, cohort, subject)?;
        let energies = control::regional_energies(solver, &adjacency, &states, rho)?;
        debug!(
            target: "netstate::control",
            cohort = cohort.name.as_str(),
            subject,
            regions = energies.dim().0,
            "regional energies computed"
        );
        Ok((present, energies))
    }

    /// Summarize `<energy_dir>/<cohort>/<subject>_energy.csv` for every
    /// configured subject and write the tables to `<output>/energy`
    pub fn summarize_energy(&self, energy_dir: &Path, tag: &str) -> Result<EnergyTables> {
        let mut tables = EnergyTables::default();
        for cohort in &self.config.cohorts {
            let mut report = CohortReport::new(&cohort.name);
            for subject in io::read_subject_list(&cohort.subject_list)? {
                let path = energy_dir
                    .join(&cohort.name)
                    .join(format!("{subject}_energy.csv"));
                let outcome = io::read_numeric_csv(&path, "energy")
                    .and_then(|matrix| EnergySummary::from_matrix(&matrix));
                if let Some(summary) = report.record(subject, outcome)? {
                    tables.push(subject, &cohort.name, &summary);
                }
            }
            info!(
                target: "netstate::energy",
                cohort = cohort.name.as_str(),
                processed = report.processed.len(),
                skipped = report.skipped.len(),
                "energy summarized"
            );
        }

        let dir = self.config.output_dir.join("energy");
        io::ensure_dir(&dir)?;
        for (stem, rows) in tables.named(tag) {
            io::write_rows(&dir.join(format!("{stem}.csv")), rows)?;
        }
        Ok(tables)
    }
}

/// Write `<C>fo`, `<C>dt`, `<C>ar`, `<C>_TP2D`, `<C>_TP2D_NoPersist` and
/// `<C>_subjects` for every cohort into one container
fn write_group_metrics(path: &Path, groups: &[(&str, GroupDynamics)]) -> Result<()> {
    let mut npz = NpzWriter::new(File::create(path)?);
    for (cohort, group) in groups {
        npz.add_array(format!("{cohort}fo"), &group.fractional_occupancy)?;
        npz.add_array(format!("{cohort}dt"), &group.dwell_time)?;
        npz.add_array(format!("{cohort}ar"), &group.appearance_rate)?;
        npz.add_array(format!("{cohort}_TP2D"), &group.transition_probability)?;
        npz.add_array(
            format!("{cohort}_TP2D_NoPersist"),
            &group.transition_probability_no_persist,
        )?;
        let subjects: Array1<i64> = group.subjects().iter().map(|&s| s as i64).collect();
        npz.add_array(format!("{cohort}_subjects"), &subjects)?;
    }
    npz.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_npy::NpzReader;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const EPS: f64 = 1e-9;

    // Columns 1-2 carry [1,-1,1,-1] and columns 3-4 carry [-1,1,1,-1], both
    // already zero-mean with unit population std. Thresholded at 0 the
    // labels are Vis, Default, Vis (tie), reject.
    const ACTIVITY: &str = "1,1,-1,-1\n-1,-1,1,1\n1,1,1,1\n-1,-1,-1,-1\n";

    struct Fixture {
        dir: TempDir,
        config: PipelineConfig,
    }

    impl Fixture {
        fn root(&self) -> &Path {
            self.dir.path()
        }
    }

    fn fixture(variants: Vec<VariantConfig>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::write(
            root.join("order.csv"),
            "ROI,network_id\n1,1\n2,1\n3,2\n4,2\n",
        )
        .unwrap();

        let mut cohorts = Vec::new();
        for (name, subjects) in [("A", "1\n2\n3\n"), ("B", "4\n")] {
            let activity_dir = root.join(format!("bold_{name}"));
            let connectivity_dir = root.join(format!("sc_{name}"));
            fs::create_dir_all(&activity_dir).unwrap();
            fs::create_dir_all(&connectivity_dir).unwrap();
            fs::write(root.join(format!("{name}_list.txt")), subjects).unwrap();
            for subject in subjects.split_whitespace() {
                // subject 2 has no activity file
                if subject != "2" {
                    fs::write(activity_dir.join(format!("{subject}_bold.csv")), ACTIVITY).unwrap();
                }
                fs::write(
                    connectivity_dir.join(format!("{subject}_FA_sc.csv")),
                    "1,0.5,0,0\n0.5,1,0.2,0\n0,0.2,1,0.1\n0,0,0.1,1\n",
                )
                .unwrap();
            }
            cohorts.push(CohortConfig {
                name: name.to_string(),
                subject_list: root.join(format!("{name}_list.txt")),
                activity_dir,
                connectivity_dir: Some(connectivity_dir),
            });
        }

        let config = PipelineConfig {
            network_map: root.join("order.csv"),
            output_dir: root.join("results"),
            cohorts,
            networks: LabelSet::new(vec![Network::Visual, Network::Default]).unwrap(),
            variants,
            sampling_interval_s: 1.0,
            total_timepoints: 4,
            region_count: 4,
            workers: Some(2),
            ..PipelineConfig::default()
        };
        Fixture { dir, config }
    }

    fn read_container(path: &Path) -> NpzReader<File> {
        NpzReader::new(File::open(path).unwrap()).unwrap()
    }

    #[test]
    fn test_missing_network_map_is_fatal() {
        let mut f = fixture(vec![VariantConfig::default()]);
        f.config.network_map = f.root().join("missing.csv");
        assert!(matches!(
            StatePipeline::new(f.config.clone()),
            Err(StateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_region_count_must_match_map() {
        let mut f = fixture(vec![VariantConfig::default()]);
        f.config.region_count = 210;
        assert!(matches!(
            StatePipeline::new(f.config.clone()),
            Err(StateError::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_extract_writes_labels_and_skips_missing_subject() {
        let f = fixture(vec![VariantConfig::default()]);
        let pipeline = StatePipeline::new(f.config.clone()).unwrap();

        let reports = pipeline.extract().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].processed, vec![1, 3]);
        assert_eq!(reports[0].skipped.len(), 1);
        assert_eq!(reports[0].skipped[0].subject, 2);

        let labels = io::read_labels(&pipeline.labels_path("A", "thr_0", 1)).unwrap();
        assert_eq!(labels.as_slice(), &[1, 2, 1, 3]);

        // 2 subjects x 3 states x 4 regions
        let table = StateMapTable::read_csv(&pipeline.state_map_path("A", "thr_0")).unwrap();
        assert_eq!(table.len(), 24);
        assert_eq!(table.subjects(), vec![1, 3]);
    }

    #[test]
    fn test_partial_cohort_has_one_fewer_column() {
        let f = fixture(vec![VariantConfig::default()]);
        let pipeline = StatePipeline::new(f.config.clone()).unwrap();

        let manifests = pipeline.run().unwrap();
        assert_eq!(manifests.len(), 1);
        let manifest = &manifests[0];
        assert_eq!(manifest.states, vec!["Vis", "Default"]);
        assert_eq!(manifest.cohorts[0].processed, vec![1, 3]);

        let mut npz = read_container(&pipeline.metrics_path("thr_0"));
        let fo: Array2<f64> = npz.by_name("Afo").unwrap();
        let tp: Array3<f64> = npz.by_name("A_TP2D").unwrap();
        let subjects: Array1<i64> = npz.by_name("A_subjects").unwrap();
        let b_fo: Array2<f64> = npz.by_name("Bfo").unwrap();

        // reject slot computed then stripped
        assert_eq!(fo.dim(), (2, 2));
        assert_eq!(tp.dim(), (2, 2, 2));
        assert_eq!(subjects, array![1i64, 3]);
        assert_eq!(b_fo.dim(), (2, 1));
        assert!((fo[[0, 0]] - 0.5).abs() < EPS);
        assert!((fo[[1, 1]] - 0.25).abs() < EPS);

        let written: RunManifest =
            serde_json::from_str(&fs::read_to_string(pipeline.manifest_path("thr_0")).unwrap())
                .unwrap();
        assert_eq!(written.run_id, manifest.run_id);
    }

    #[test]
    fn test_variants_side_by_side() {
        let excluded = VariantConfig {
            excluded_network: Some(Network::Default),
            ..VariantConfig::default()
        };
        let kept_reject = VariantConfig {
            strip_reject: false,
            ..VariantConfig::default()
        };
        let f = fixture(vec![VariantConfig::unthresholded(), excluded, kept_reject]);
        let mut config = f.config.clone();
        config.cohorts.truncate(1);
        let pipeline = StatePipeline::new(config).unwrap();
        pipeline.run().unwrap();

        // unthresholded: the final timepoint goes to Vis (first of the tie)
        let labels = io::read_labels(&pipeline.labels_path("A", "nonthr", 1)).unwrap();
        assert_eq!(labels.as_slice(), &[1, 2, 1, 1]);
        let fo: Array2<f64> = read_container(&pipeline.metrics_path("nonthr"))
            .by_name("Afo")
            .unwrap();
        assert!((fo[[0, 0]] - 0.75).abs() < EPS);

        // Default excluded: only Vis survives, reject is id 2
        let labels = io::read_labels(&pipeline.labels_path("A", "thr_0_noDefault", 1)).unwrap();
        assert_eq!(labels.as_slice(), &[1, 2, 1, 2]);
        let fo: Array2<f64> = read_container(&pipeline.metrics_path("thr_0_noDefault"))
            .by_name("Afo")
            .unwrap();
        assert_eq!(fo.dim(), (1, 2));

        // reject slot kept as the trailing state row
        let tp: Array3<f64> = read_container(&pipeline.metrics_path("thr_0"))
            .by_name("A_TP2D")
            .unwrap();
        assert_eq!(tp.dim(), (2, 3, 3));
    }

    #[test]
    fn test_wrong_sequence_length_is_skipped() {
        let f = fixture(vec![VariantConfig::default()]);
        let pipeline = StatePipeline::new(f.config.clone()).unwrap();
        pipeline.extract().unwrap();

        let mut config = f.config.clone();
        config.total_timepoints = 5;
        let pipeline = StatePipeline::new(config).unwrap();
        let manifests = pipeline.dynamics().unwrap();
        assert!(manifests[0].cohorts.iter().all(|c| c.processed.is_empty()));
        assert_eq!(manifests[0].cohorts[0].skipped.len(), 3);
    }

    #[test]
    fn test_rerun_drops_subject_whose_activity_disappeared() {
        let f = fixture(vec![VariantConfig::default()]);
        let pipeline = StatePipeline::new(f.config.clone()).unwrap();
        pipeline.run().unwrap();
        assert!(pipeline.labels_path("A", "thr_0", 3).exists());

        fs::remove_file(f.root().join("bold_A").join("3_bold.csv")).unwrap();
        let reports = pipeline.extract().unwrap();
        assert_eq!(reports[0].processed, vec![1]);
        assert!(!pipeline.labels_path("A", "thr_0", 3).exists());

        let manifests = pipeline.dynamics().unwrap();
        assert_eq!(manifests[0].cohorts[0].processed, vec![1]);
        let mut npz = read_container(&pipeline.metrics_path("thr_0"));
        let fo: Array2<f64> = npz.by_name("Afo").unwrap();
        let subjects: Array1<i64> = npz.by_name("A_subjects").unwrap();
        assert_eq!(fo.dim(), (2, 1));
        assert_eq!(subjects, array![1i64]);
    }

    #[test]
    fn test_malformed_activity_is_skipped() {
        let f = fixture(vec![VariantConfig::default()]);
        fs::write(
            f.root().join("bold_A").join("3_bold.csv"),
            "1,1,x,-1\n-1,-1,1,1\n1,1,1,1\n-1,-1,-1,-1\n",
        )
        .unwrap();
        let pipeline = StatePipeline::new(f.config.clone()).unwrap();

        let reports = pipeline.extract().unwrap();
        let skipped: Vec<SubjectId> = reports[0].skipped.iter().map(|s| s.subject).collect();
        assert_eq!(skipped, vec![2, 3]);
        assert!(reports[0].skipped[1].reason.contains("3_bold.csv"));

        let manifests = pipeline.dynamics().unwrap();
        assert_eq!(manifests[0].cohorts[0].processed, vec![1]);
        assert_eq!(manifests[0].cohorts[1].processed, vec![4]);
    }

    #[test]
    fn test_missing_subject_list_is_fatal() {
        let mut f = fixture(vec![VariantConfig::default()]);
        f.config.cohorts[1].subject_list = f.root().join("missing_list.txt");
        let pipeline = StatePipeline::new(f.config.clone()).unwrap();
        assert!(matches!(pipeline.extract(), Err(StateError::InvalidConfig(_))));
    }

    struct DistanceSolver;

    impl ControlEnergySolver for DistanceSolver {
        fn energies(
            &self,
            _adjacency: &Array2<f64>,
            tasks: &[control::ControlTask],
        ) -> Result<Vec<f64>> {
            Ok(tasks
                .iter()
                .map(|t| {
                    let diff = &t.xf - &t.x0;
                    diff.dot(&diff)
                })
                .collect())
        }
    }

    #[test]
    fn test_control_tasks_and_energy_summary() {
        let f = fixture(vec![VariantConfig::default()]);
        let pipeline = StatePipeline::new(f.config.clone()).unwrap();
        pipeline.extract().unwrap();
        let variant = VariantConfig::default();

        let path = pipeline.prepare_control_tasks(&variant, "A", 1, 1.0).unwrap();
        let mut npz = read_container(&path);
        let x0: Array2<f64> = npz.by_name("x0").unwrap();
        let a: Array2<f64> = npz.by_name("A").unwrap();
        assert_eq!(x0.dim(), (4, 4));
        assert_eq!(a[[0, 0]], 0.0);
        assert_eq!(a[[0, 1]], 0.5);

        let (present, energies) = pipeline
            .subject_energy(&DistanceSolver, &variant, "A", 3, 1.0)
            .unwrap();
        assert_eq!(present, vec![Network::Visual, Network::Default]);
        assert_eq!(energies.dim(), (2, 2));
        assert!(energies[[0, 0]].abs() < EPS);

        // one slice per region; this solver ignores B so every slice matches
        let (present, regional) = pipeline
            .regional_energy(&DistanceSolver, &variant, "A", 3, 1.0)
            .unwrap();
        assert_eq!(present.len(), 2);
        assert_eq!(regional.dim(), (4, 2, 2));
        for slice in regional.outer_iter() {
            assert_eq!(slice, energies.view());
        }

        // skipped subject has no state map
        assert!(pipeline
            .prepare_control_tasks(&variant, "A", 2, 1.0)
            .unwrap_err()
            .is_recoverable());

        let energy_dir = f.root().join("energy_in");
        fs::create_dir_all(energy_dir.join("A")).unwrap();
        fs::create_dir_all(energy_dir.join("B")).unwrap();
        fs::write(energy_dir.join("A").join("1_energy.csv"), "10,2\n4,1000\n").unwrap();
        fs::write(energy_dir.join("B").join("4_energy.csv"), "10,2\n4,1000\n").unwrap();

        let tables = pipeline.summarize_energy(&energy_dir, "T1_thr_0").unwrap();
        assert_eq!(tables.average_persistence.len(), 2);
        assert!((tables.average_transition[0].value - 3.0).abs() < EPS);
        assert!(f
            .root()
            .join("results")
            .join("energy")
            .join("df_oce_T1_thr_0.csv")
            .exists());
    }
}
