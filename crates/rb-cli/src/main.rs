//! Rebinner CLI

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use rb_core::{Region, Year};
use rb_engine::{
    BinningParams, Engine, EngineOptions, SystematicsRegistry, Unit, VariableSpec,
};
use rb_hist::{SampleRegistry, TemplateSet};

#[derive(Parser)]
#[command(name = "rebinner")]
#[command(about = "Rebinner - template rebinning and systematic shape construction")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebin a template collection and build its systematic shapes
    Modify {
        /// Input template collection (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Data-taking year (16APV, 16, 17, 18)
        #[arg(short, long)]
        year: String,

        /// Analysis region (sr, vr, baseline)
        #[arg(short, long, default_value = "sr")]
        region: String,

        /// Kinematic variable the templates are binned in
        #[arg(short, long)]
        variable: String,

        /// Stat-threshold parameter of the binning walk (>1 = fixed-merge mode)
        #[arg(long)]
        stat_threshold: Option<f64>,

        /// Minimum number of bins per merge window
        #[arg(long)]
        min_merge: Option<usize>,

        /// Use the ABCDNN estimate in its control region
        #[arg(long)]
        abcdnn: bool,

        /// Engine configuration file (JSON); flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print per-histogram yields of a template collection
    Inspect {
        /// Template collection (JSON)
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// On-disk engine configuration. Every section is optional and falls back
/// to the built-in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    params: Option<BinningParams>,
    #[serde(default)]
    options: Option<EngineOptions>,
    #[serde(default)]
    systematics: Option<SystematicsRegistry>,
    #[serde(default)]
    samples: Option<SampleRegistry>,
    #[serde(default)]
    variables: Option<Vec<VariableSpec>>,
}

/// Plotting ranges for the standard variables.
fn default_variables() -> Vec<VariableSpec> {
    let continuous = [
        ("HT", 0.0, 3000.0),
        ("ST", 0.0, 5000.0),
        ("MET", 0.0, 1000.0),
        ("PTLEP", 0.0, 1000.0),
        ("DNN", 0.0, 1.0),
    ];
    let integer = [("NJ", 0.0, 14.0), ("NB", 0.0, 6.0), ("NHOT", 0.0, 5.0)];
    continuous
        .iter()
        .map(|&(name, x_min, x_max)| VariableSpec {
            name: name.to_string(),
            x_min,
            x_max,
            integer: false,
        })
        .chain(integer.iter().map(|&(name, x_min, x_max)| VariableSpec {
            name: name.to_string(),
            x_min,
            x_max,
            integer: true,
        }))
        .collect()
}

fn parse_year(s: &str) -> Result<Year> {
    Year::from_label(s).with_context(|| format!("unknown year `{s}` (16APV, 16, 17, 18)"))
}

fn parse_region(s: &str) -> Result<Region> {
    match s.to_ascii_lowercase().as_str() {
        "sr" => Ok(Region::Sr),
        "vr" => Ok(Region::Vr),
        "baseline" => Ok(Region::Baseline),
        other => anyhow::bail!("unknown region `{other}` (sr, vr, baseline)"),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<FileConfig> {
    let Some(path) = path else { return Ok(FileConfig::default()) };
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing config {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Modify {
            input,
            year,
            region,
            variable,
            stat_threshold,
            min_merge,
            abcdnn,
            config,
        } => {
            let file = load_config(config.as_ref())?;
            let mut params = file.params.unwrap_or_default();
            let mut options = file.options.unwrap_or_default();
            let systematics = file.systematics.unwrap_or_default();
            let samples = file.samples.unwrap_or_default();
            let variables = file.variables.unwrap_or_else(default_variables);

            let spec = variables
                .into_iter()
                .find(|v| v.name == variable)
                .with_context(|| format!("variable `{variable}` is not configured"))?;
            if let Some(t) = stat_threshold {
                params.stat_threshold = t;
            }
            if let Some(m) = min_merge {
                params.min_merge = m;
            }
            // multiplicity templates commit a boundary per populated bin,
            // so wider merge windows would only discard resolution
            if spec.integer {
                params.min_merge = 1;
            }
            options.abcdnn = options.abcdnn || abcdnn;

            let unit = Unit {
                variable: spec,
                year: parse_year(&year)?,
                region: parse_region(&region)?,
            };
            let engine = Engine::new(unit, params, options, systematics, samples)?;
            let out = engine.process_file(&input)?;
            println!("{}", out.display());
        }
        Commands::Inspect { input } => {
            let set = TemplateSet::load(&input)?;
            println!("variable: {}  year: {}", set.variable, set.year);
            for (name, hist) in &set.histograms {
                println!(
                    "{name}  bins={}  integral={:.4}  error={:.4}",
                    hist.n_bins(),
                    hist.integral(),
                    hist.integral_error()
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_and_region_parse() {
        assert_eq!(parse_year("16APV").unwrap(), Year::Run16Apv);
        assert_eq!(parse_region("SR").unwrap(), Region::Sr);
        assert!(parse_year("15").is_err());
        assert!(parse_region("cr").is_err());
    }

    #[test]
    fn default_variable_table_marks_multiplicities_integer() {
        let vars = default_variables();
        assert!(vars.iter().find(|v| v.name == "NJ").unwrap().integer);
        assert!(!vars.iter().find(|v| v.name == "HT").unwrap().integer);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "params": { "stat_threshold": 1.3 } }"#).unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.params.unwrap().stat_threshold, 1.3);
    }
}
