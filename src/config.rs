//! Run configuration
//!
//! A single JSON document describes the cohorts, the reference network map,
//! the classifier variants to run and the acquisition parameters. Every field
//! has a default so a partial document is enough.

use crate::classifier::DEFAULT_ACTIVATION_THRESHOLD;
use crate::error::{Result, StateError};
use crate::types::{LabelSet, Network};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default sampling interval (seconds per timepoint)
pub const DEFAULT_SAMPLING_INTERVAL_S: f64 = 0.735;

/// Default number of timepoints per scan
pub const DEFAULT_TOTAL_TIMEPOINTS: usize = 490;

/// Default number of cortical regions in the reference map
pub const DEFAULT_REGION_COUNT: usize = 210;

/// One cohort (e.g. cases or controls)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortConfig {
    /// Cohort name, used in output paths and array names
    pub name: String,
    /// Whitespace-delimited subject identifiers
    pub subject_list: PathBuf,
    /// Directory holding `<subject>_bold.csv` activity matrices
    pub activity_dir: PathBuf,
    /// Directory holding `<subject>_FA_sc.csv` structural connectivity
    #[serde(default)]
    pub connectivity_dir: Option<PathBuf>,
}

/// One classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantConfig {
    /// `None` runs without a reject branch
    pub activation_threshold: Option<f64>,
    /// Network removed before classification
    pub excluded_network: Option<Network>,
    /// Strip the reject slot from metrics so the variant compares with
    /// reject-free variants
    pub strip_reject: bool,
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            activation_threshold: Some(DEFAULT_ACTIVATION_THRESHOLD),
            excluded_network: None,
            strip_reject: true,
        }
    }
}

impl VariantConfig {
    pub fn unthresholded() -> Self {
        Self {
            activation_threshold: None,
            ..Self::default()
        }
    }

    /// Directory name for this variant (`thr_0`, `nonthr`, `thr_0_noLimbic`)
    pub fn name(&self) -> String {
        let base = match self.activation_threshold {
            Some(t) if t.fract() == 0.0 => format!("thr_{}", t as i64),
            Some(t) => format!("thr_{t}"),
            None => "nonthr".to_string(),
        };
        match self.excluded_network {
            Some(network) => format!("{base}_no{network}"),
            None => base,
        }
    }

    /// Whether the metrics engine tracks a reject slot for this variant
    pub fn has_reject_slot(&self) -> bool {
        self.activation_threshold.is_some()
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `netstate=debug`
    pub level: String,
    /// Emit JSON lines instead of compact text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reference table with `ROI` and `network_id` columns
    pub network_map: PathBuf,
    /// Root directory for all outputs
    pub output_dir: PathBuf,
    pub cohorts: Vec<CohortConfig>,
    /// Networks in identifier order; the reject state is implicit
    pub networks: LabelSet,
    pub variants: Vec<VariantConfig>,
    pub sampling_interval_s: f64,
    pub total_timepoints: usize,
    /// Expected number of regions in the reference map
    pub region_count: usize,
    /// Worker threads for subject-level processing (rayon default if unset)
    pub workers: Option<usize>,
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            network_map: PathBuf::from("resources/BNA_210_yeo_order.csv"),
            output_dir: PathBuf::from("results"),
            cohorts: Vec::new(),
            networks: LabelSet::canonical(),
            variants: vec![VariantConfig::default()],
            sampling_interval_s: DEFAULT_SAMPLING_INTERVAL_S,
            total_timepoints: DEFAULT_TOTAL_TIMEPOINTS,
            region_count: DEFAULT_REGION_COUNT,
            workers: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StateError::InvalidConfig(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let config = Self::from_json(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would invalidate every subject's result
    pub fn validate(&self) -> Result<()> {
        if !(self.sampling_interval_s > 0.0 && self.sampling_interval_s.is_finite()) {
            return Err(StateError::InvalidConfig(format!(
                "sampling interval must be positive, got {}",
                self.sampling_interval_s
            )));
        }
        if self.total_timepoints == 0 {
            return Err(StateError::InvalidConfig(
                "total_timepoints must be at least 1".to_string(),
            ));
        }
        if self.region_count == 0 {
            return Err(StateError::InvalidConfig(
                "region_count must be at least 1".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(StateError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.cohorts.is_empty() {
            return Err(StateError::InvalidConfig("no cohorts configured".to_string()));
        }
        for (i, cohort) in self.cohorts.iter().enumerate() {
            if cohort.name.trim().is_empty() {
                return Err(StateError::InvalidConfig(format!("cohort {i} has no name")));
            }
            if self.cohorts[..i].iter().any(|c| c.name == cohort.name) {
                return Err(StateError::InvalidConfig(format!(
                    "cohort {} listed twice",
                    cohort.name
                )));
            }
        }
        if self.variants.is_empty() {
            return Err(StateError::InvalidConfig("no variants configured".to_string()));
        }
        for (i, variant) in self.variants.iter().enumerate() {
            // variants share an output directory when their names collide
            let name = variant.name();
            if self.variants[..i].iter().any(|v| v.name() == name) {
                return Err(StateError::InvalidConfig(format!(
                    "variant {name} listed twice"
                )));
            }
            if let Some(t) = variant.activation_threshold {
                if !t.is_finite() {
                    return Err(StateError::InvalidConfig(format!(
                        "activation threshold must be finite, got {t}"
                    )));
                }
            }
            if let Some(network) = variant.excluded_network {
                if !self.networks.contains(network) {
                    return Err(StateError::UnknownNetwork(format!(
                        "{network} cannot be excluded: not in the configured networks"
                    )));
                }
                if self.networks.network_count() == 1 {
                    return Err(StateError::InvalidConfig(
                        "cannot exclude the only configured network".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cohort(name: &str) -> CohortConfig {
        CohortConfig {
            name: name.to_string(),
            subject_list: PathBuf::from(format!("{name}_list.txt")),
            activity_dir: PathBuf::from(format!("rfMRI_bold_{name}")),
            connectivity_dir: None,
        }
    }

    fn valid_config() -> PipelineConfig {
        PipelineConfig {
            cohorts: vec![cohort("HC"), cohort("MDD")],
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.sampling_interval_s, 0.735);
        assert_eq!(config.total_timepoints, 490);
        assert_eq!(config.networks.network_count(), 7);
        assert_eq!(config.variants[0].activation_threshold, Some(0.0));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "network_map": "order.csv",
            "cohorts": [
                {"name": "HC", "subject_list": "HC_list.txt", "activity_dir": "bold_HC"}
            ],
            "variants": [
                {"activation_threshold": 0.0, "excluded_network": "Limbic"},
                {"activation_threshold": null}
            ]
        }"#;
        let config = PipelineConfig::from_json(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.network_map, PathBuf::from("order.csv"));
        assert_eq!(config.variants[0].excluded_network, Some(Network::Limbic));
        assert!(config.variants[0].strip_reject);
        assert_eq!(config.variants[1].activation_threshold, None);
        assert_eq!(config.total_timepoints, DEFAULT_TOTAL_TIMEPOINTS);
    }

    #[test]
    fn test_json_round_trip() {
        let config = valid_config();
        let back = PipelineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_variant_names() {
        assert_eq!(VariantConfig::default().name(), "thr_0");
        assert_eq!(VariantConfig::unthresholded().name(), "nonthr");
        let variant = VariantConfig {
            activation_threshold: Some(0.5),
            excluded_network: Some(Network::Limbic),
            strip_reject: true,
        };
        assert_eq!(variant.name(), "thr_0.5_noLimbic");
    }

    #[test]
    fn test_validation_errors() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.sampling_interval_s = 0.0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.cohorts.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.cohorts.push(cohort("HC"));
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.networks = LabelSet::canonical().without(Network::Limbic).unwrap();
        config.variants = vec![VariantConfig {
            excluded_network: Some(Network::Limbic),
            ..VariantConfig::default()
        }];
        assert!(matches!(config.validate(), Err(StateError::UnknownNetwork(_))));
    }

    #[test]
    fn test_duplicate_variant_names_rejected() {
        // both resolve to thr_0 and would overwrite one container
        let mut config = valid_config();
        config.variants = vec![
            VariantConfig::default(),
            VariantConfig {
                strip_reject: false,
                ..VariantConfig::default()
            },
        ];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, StateError::InvalidConfig(ref m) if m.contains("thr_0")));

        config.variants[1] = VariantConfig::unthresholded();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_config_file() {
        let err = PipelineConfig::load(Path::new("/nonexistent/netstate.json")).unwrap_err();
        assert!(matches!(err, StateError::InvalidConfig(_)));
    }
}
