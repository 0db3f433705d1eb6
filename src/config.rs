//! Module for the engine configuration: where to read, where to write, and the ordered list of
//! sources with their strategy and transform rules.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::{Error, invalid_setting};
use crate::output::OutputFormat;
use crate::transform::RuleSet;

pub const DEFAULT_CHUNK_SIZE: usize = 200_000;
pub const DEFAULT_RESERVOIR_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the source files
    pub data_dir: PathBuf,
    /// Destination root for processed tables
    pub output_dir: PathBuf,
    /// Directory of the persisted run records
    pub runs_dir: PathBuf,
    pub chunk_size: usize,
    pub reservoir_capacity: usize,
    /// Fixes the reservoir sampling seed; sampling is seeded from entropy otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_seed: Option<u64>,
    pub partial_output: PartialOutputPolicy,
    pub sources: Vec<SourceConfig>,
}

/// What happens to the output of a streamed source that fails half-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialOutputPolicy {
    /// Keep the batches written so far for inspection
    #[default]
    Retain,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stage name under which progress is reported
    pub name: String,
    /// Input file name, relative to `data_dir`
    pub file: String,
    /// Output file name, relative to `output_dir`. Derived from `file` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub rules: RuleSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Materialize, transform and write once
    #[default]
    Full,
    /// Stream in bounded batches; `chunk_size` overrides the engine default
    Chunked {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_size: Option<usize>,
    },
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, file: impl Into<String>, rules: RuleSet) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            output: None,
            strategy: Strategy::Full,
            rules,
        }
    }

    pub fn chunked(mut self, chunk_size: Option<usize>) -> Self {
        self.strategy = Strategy::Chunked { chunk_size };
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// `Bank_Price_Data_China new.csv` → `Bank_Price_Data_China_new.processed.csv`
    pub fn output_name(&self) -> String {
        if let Some(output) = &self.output {
            return output.clone();
        }
        let stem = Path::new(&self.file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone());
        format!("{}.processed.csv", stem.replace(' ', "_"))
    }
}

impl EngineConfig {
    /// A configuration rooted at `root`, with `data/`, `data/processed/` and `reports/etl_runs/`
    /// below it and the default sources.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            output_dir: root.join("data").join("processed"),
            runs_dir: root.join("reports").join("etl_runs"),
            ..Self::default()
        }
    }

    pub fn source_path(&self, source: &SourceConfig) -> PathBuf {
        self.data_dir.join(&source.file)
    }

    pub fn output_path(&self, source: &SourceConfig) -> PathBuf {
        self.output_dir.join(source.output_name())
    }

    pub fn chunk_size_for(&self, source: &SourceConfig) -> usize {
        match source.strategy {
            Strategy::Chunked {
                chunk_size: Some(size),
            } => size,
            _ => self.chunk_size,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_size == 0 {
            return Err(invalid_setting("chunk_size must be positive"));
        }
        let mut outputs = std::collections::HashSet::new();
        for source in &self.sources {
            if let Strategy::Chunked { chunk_size } = source.strategy {
                if chunk_size == Some(0) {
                    return Err(invalid_setting(format!(
                        "source {}: chunk_size must be positive",
                        source.name
                    )));
                }
                let output = source.output_name();
                if OutputFormat::from_path(Path::new(&output)) == OutputFormat::Parquet {
                    return Err(invalid_setting(format!(
                        "source {}: streamed output {output} must be CSV, parquet cannot be appended to",
                        source.name
                    )));
                }
            }
            if !outputs.insert(source.output_name()) {
                return Err(invalid_setting(format!(
                    "source {}: output {} is shared with another source",
                    source.name,
                    source.output_name()
                )));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("data/processed"),
            runs_dir: PathBuf::from("reports/etl_runs"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            reservoir_capacity: DEFAULT_RESERVOIR_CAPACITY,
            sample_seed: None,
            partial_output: PartialOutputPolicy::Retain,
            sources: default_sources(),
        }
    }
}

pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new(
            "bank_prices",
            "Bank_Price_Data_China new.csv",
            RuleSet::bank_prices(),
        ),
        SourceConfig::new(
            "tata_motors",
            "final_dataset_tata_motors.csv",
            RuleSet::tata_motors(),
        ),
        SourceConfig::new("pool_swaps", "pool_swaps.csv", RuleSet::pool_swaps()).chunked(None),
    ]
}

/// Loads the configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables prefixed with `ETL_ENGINE_` (`ETL_ENGINE_CHUNK_SIZE`, ...)
/// 2. The TOML file at `path`, if given
/// 3. Built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, Error> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("ETL_ENGINE_").split("__"));

    let config: EngineConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use claims::{assert_matches, assert_ok};

    use super::*;

    #[test]
    fn default_sources_match_the_three_datasets() {
        let config = EngineConfig::default();

        let names: Vec<_> = config.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["bank_prices", "tata_motors", "pool_swaps"]);
        assert_eq!(
            config.sources[2].strategy,
            Strategy::Chunked { chunk_size: None }
        );
        assert_ok!(config.validate());
    }

    #[test]
    fn output_names_are_derived_from_the_input_file() {
        let sources = default_sources();

        assert_eq!(
            sources[0].output_name(),
            "Bank_Price_Data_China_new.processed.csv"
        );
        assert_eq!(sources[2].output_name(), "pool_swaps.processed.csv");
        assert_eq!(
            sources[0].clone().with_output("banks.parquet").output_name(),
            "banks.parquet"
        );
    }

    #[test]
    fn per_source_chunk_size_overrides_the_default() {
        let config = EngineConfig {
            chunk_size: 10,
            ..EngineConfig::default()
        };
        let full = SourceConfig::new("a", "a.csv", RuleSet::default());
        let chunked = SourceConfig::new("b", "b.csv", RuleSet::default()).chunked(Some(3));

        assert_eq!(config.chunk_size_for(&full), 10);
        assert_eq!(config.chunk_size_for(&chunked), 3);
    }

    #[test]
    fn shared_outputs_are_rejected() {
        let config = EngineConfig {
            sources: vec![
                SourceConfig::new("a", "x.csv", RuleSet::default()),
                SourceConfig::new("b", "x.csv", RuleSet::default()),
            ],
            ..EngineConfig::default()
        };

        assert_matches!(config.validate(), Err(Error::InvalidSetting(_)));
    }

    #[test]
    fn streamed_parquet_output_is_rejected() {
        let config = EngineConfig {
            sources: vec![
                SourceConfig::new("a", "a.csv", RuleSet::default())
                    .chunked(None)
                    .with_output("a.parquet"),
            ],
            ..EngineConfig::default()
        };

        assert_matches!(config.validate(), Err(Error::InvalidSetting(_)));
    }

    #[test]
    fn toml_file_and_environment_are_layered_over_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "engine.toml",
                r#"
                chunk_size = 500
                partial_output = "delete"

                [[sources]]
                name = "swaps"
                file = "swaps.csv"
                strategy = { kind = "chunked", chunk_size = 50 }
                rules = { scaled = [{ amount = "raw", exponent = "dec", target = "ui" }] }
                "#,
            )?;
            jail.set_env("ETL_ENGINE_RESERVOIR_CAPACITY", "25");

            let config = load_config(Some(Path::new("engine.toml"))).expect("config loads");

            assert_eq!(config.chunk_size, 500);
            assert_eq!(config.reservoir_capacity, 25);
            assert_eq!(config.partial_output, PartialOutputPolicy::Delete);
            assert_eq!(config.sources.len(), 1);
            assert_eq!(config.chunk_size_for(&config.sources[0]), 50);
            assert_eq!(config.sources[0].rules.scaled[0].target, "ui");
            Ok(())
        });
    }

    #[test]
    fn zero_chunk_size_is_rejected_on_load() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ETL_ENGINE_CHUNK_SIZE", "0");
            let result = load_config(None);
            assert_matches!(result, Err(Error::InvalidSetting(_)));
            Ok(())
        });
    }
}
