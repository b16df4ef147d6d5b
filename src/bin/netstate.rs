//! netstate CLI - Command-line interface for netstate
//!
//! Commands:
//! - extract: Classify every subject and write labels and state maps
//! - dynamics: Compute group dynamics from persisted labels
//! - run: extract followed by dynamics
//! - control-tasks: Write one subject's control-task bundle
//! - energy-summary: Aggregate externally computed energy matrices
//! - doctor: Diagnose configuration and input files
//! - config: Print a configuration

use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use netstate::config::PipelineConfig;
use netstate::control::DEFAULT_RHO;
use netstate::io::{read_network_map, read_subject_list};
use netstate::logging::init_logging;
use netstate::types::{RegionNetworkMap, SubjectId};
use netstate::{StateError, StatePipeline, NETSTATE_VERSION};

/// netstate - Dominant brain-network states and their temporal dynamics
#[derive(Parser)]
#[command(name = "netstate")]
#[command(version = NETSTATE_VERSION)]
#[command(about = "Label dominant network states and compute their dynamics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every subject of every cohort, write labels and state maps
    Extract {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Compute group dynamics from persisted label files
    Dynamics {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Extract then compute dynamics
    Run {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Write the control-task bundle of one subject
    ControlTasks {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Variant directory name (e.g. thr_0, nonthr)
        #[arg(long)]
        variant: String,

        /// Cohort name
        #[arg(long)]
        cohort: String,

        /// Subject identifier
        #[arg(long)]
        subject: SubjectId,

        /// Weighting between control energy and state deviation
        #[arg(long, default_value_t = DEFAULT_RHO)]
        rho: f64,
    },

    /// Summarize externally computed energy matrices
    EnergySummary {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory holding <cohort>/<subject>_energy.csv
        #[arg(long)]
        energy_dir: PathBuf,

        /// Suffix of the output tables (e.g. T1_thr_0)
        #[arg(long)]
        tag: String,
    },

    /// Diagnose configuration and input files
    Doctor {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a configuration with every default filled in
    Config {
        /// Print the default configuration
        #[arg(long)]
        default: bool,

        /// Configuration file to expand
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), NetstateCliError> {
    match cli.command {
        Commands::Extract { config } => {
            let pipeline = load_pipeline(&config)?;
            let reports = pipeline.extract()?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(())
        }

        Commands::Dynamics { config } => {
            let pipeline = load_pipeline(&config)?;
            let manifests = pipeline.dynamics()?;
            println!("{}", serde_json::to_string_pretty(&manifests)?);
            Ok(())
        }

        Commands::Run { config } => {
            let pipeline = load_pipeline(&config)?;
            let manifests = pipeline.run()?;
            println!("{}", serde_json::to_string_pretty(&manifests)?);
            Ok(())
        }

        Commands::ControlTasks {
            config,
            variant,
            cohort,
            subject,
            rho,
        } => {
            let pipeline = load_pipeline(&config)?;
            let variant = pipeline.variant(&variant)?.clone();
            let path = pipeline.prepare_control_tasks(&variant, &cohort, subject, rho)?;
            println!("{}", path.display());
            Ok(())
        }

        Commands::EnergySummary {
            config,
            energy_dir,
            tag,
        } => {
            let pipeline = load_pipeline(&config)?;
            let tables = pipeline.summarize_energy(&energy_dir, &tag)?;
            println!(
                "Summarized {} subjects into {}",
                tables.average_persistence.len(),
                pipeline.config().output_dir.join("energy").display()
            );
            Ok(())
        }

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Config { default, config } => {
            let config = match (default, config) {
                (true, _) => PipelineConfig::default(),
                (false, Some(path)) => PipelineConfig::load(&path)?,
                (false, None) => {
                    return Err(NetstateCliError::Usage(
                        "pass --default or --config <file>".to_string(),
                    ))
                }
            };
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn load_pipeline(path: &Path) -> Result<StatePipeline, NetstateCliError> {
    let config = PipelineConfig::load(path)?;
    init_logging(&config.logging)?;
    Ok(StatePipeline::new(config)?)
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), NetstateCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "netstate_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("netstate version {}", NETSTATE_VERSION),
    });

    let config = match config_path {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "{} cohorts, {} variants",
                        config.cohorts.len(),
                        config.variants.len()
                    ),
                });
                Some(config)
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
                None
            }
        },
        None => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "No configuration given, only defaults checked".to_string(),
            });
            None
        }
    };

    if let Some(config) = &config {
        checks.push(check_network_map(config));

        for cohort in &config.cohorts {
            let name = format!("cohort:{}", cohort.name);
            match read_subject_list(&cohort.subject_list) {
                Ok(subjects) if subjects.is_empty() => checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Warning,
                    message: "Subject list is empty".to_string(),
                }),
                Ok(subjects) => checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Ok,
                    message: format!("{} subjects listed", subjects.len()),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Error,
                    message: e.to_string(),
                }),
            }

            if !cohort.activity_dir.is_dir() {
                checks.push(DoctorCheck {
                    name: format!("cohort:{}:activity_dir", cohort.name),
                    status: CheckStatus::Warning,
                    message: format!("{} does not exist", cohort.activity_dir.display()),
                });
            }
            if let Some(dir) = cohort.connectivity_dir.as_ref().filter(|d| !d.is_dir()) {
                checks.push(DoctorCheck {
                    name: format!("cohort:{}:connectivity_dir", cohort.name),
                    status: CheckStatus::Warning,
                    message: format!("{} does not exist", dir.display()),
                });
            }
        }

        checks.push(if config.output_dir.is_dir() {
            DoctorCheck {
                name: "output_dir".to_string(),
                status: CheckStatus::Ok,
                message: format!("{} exists", config.output_dir.display()),
            }
        } else {
            DoctorCheck {
                name: "output_dir".to_string(),
                status: CheckStatus::Warning,
                message: format!("{} will be created", config.output_dir.display()),
            }
        });
    }

    let report = DoctorReport {
        version: NETSTATE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("netstate Doctor Report");
        println!("======================");
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(NetstateCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_network_map(config: &PipelineConfig) -> DoctorCheck {
    let outcome = read_network_map(&config.network_map)
        .and_then(|entries| RegionNetworkMap::new(entries, &config.networks));
    match outcome {
        Ok(map) if map.len() == config.region_count => DoctorCheck {
            name: "network_map".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{} regions over {} networks",
                map.len(),
                map.network_count()
            ),
        },
        Ok(map) => DoctorCheck {
            name: "network_map".to_string(),
            status: CheckStatus::Error,
            message: format!(
                "expected {} regions, map has {}",
                config.region_count,
                map.len()
            ),
        },
        Err(e) => DoctorCheck {
            name: "network_map".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    }
}

// Error types

#[derive(Debug)]
enum NetstateCliError {
    Io(io::Error),
    State(StateError),
    Json(serde_json::Error),
    Usage(String),
    DoctorFailed,
}

impl From<io::Error> for NetstateCliError {
    fn from(e: io::Error) -> Self {
        NetstateCliError::Io(e)
    }
}

impl From<StateError> for NetstateCliError {
    fn from(e: StateError) -> Self {
        NetstateCliError::State(e)
    }
}

impl From<serde_json::Error> for NetstateCliError {
    fn from(e: serde_json::Error) -> Self {
        NetstateCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NetstateCliError> for CliError {
    fn from(e: NetstateCliError) -> Self {
        match e {
            NetstateCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NetstateCliError::State(e) => {
                let (code, hint) = match &e {
                    StateError::InvalidConfig(_) | StateError::Json(_) => {
                        ("CONFIG_ERROR", "Run 'netstate doctor --config <file>' for details")
                    }
                    StateError::UnknownNetwork(_) | StateError::InvalidMapping(_) => {
                        ("MAPPING_ERROR", "Check the network map and the configured networks")
                    }
                    StateError::InvalidLabelSet(_) => {
                        ("LABEL_SET_ERROR", "Check the variant's reject-slot settings")
                    }
                    StateError::MissingInput { .. }
                    | StateError::CorruptInput { .. }
                    | StateError::ShapeMismatch { .. } => {
                        ("INPUT_ERROR", "Check the subject's input files")
                    }
                    _ => ("IO_ERROR", "Check file paths and permissions"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            NetstateCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            NetstateCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'netstate config --help'".to_string()),
            },
            NetstateCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
