//! Ingestion configuration.
//!
//! Built-in defaults, optionally overridden by a YAML file, then by
//! `HRRR_*` environment variables, then by CLI flags. The result is
//! validated once, before any network or database activity, and never
//! changes afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use storage::forecast_store::validate_table_name;
use storage::{RemoteSourceConfig, DEFAULT_TABLE_NAME};

use crate::error::{IngestionError, Result};
use crate::pipeline::PipelineOptions;
use crate::run::{
    default_run_date, parse_cycle, parse_run_date, plan_runs, ForecastRunKey, DEFAULT_KEY_TEMPLATE,
};
use crate::staging::StagingOptions;
use crate::variables::{VariableCatalog, VariableResolver, VariableSpec};

/// Backoff for transient staging failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per file, including the first
    pub max_attempts: u32,
    /// Delay before the first retry (doubles each retry)
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Everything one ingestion run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub source: RemoteSourceConfig,
    pub key_template: String,
    pub file_type: String,
    /// Two-digit cycle hour
    pub cycle: String,
    pub forecast_hours: Vec<u32>,
    /// Hours of runs to look back from `run_date`
    pub num_hours: u32,
    /// `YYYYMMDD`; yesterday (UTC) when unset
    pub run_date: Option<String>,
    /// Requested variables; all catalog entries when empty
    pub variables: Vec<String>,
    /// Catalog entries added to the built-in table
    pub extra_variables: Vec<VariableSpec>,
    pub concurrency: usize,
    /// Distance beyond which a point is flagged as out of domain
    pub out_of_domain_km: f64,
    pub use_index: bool,
    pub staging_dir: Option<PathBuf>,
    pub db_file: PathBuf,
    pub table_name: String,
    pub retry: RetryConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: RemoteSourceConfig::default(),
            key_template: DEFAULT_KEY_TEMPLATE.to_string(),
            file_type: "wrfsfc".to_string(),
            cycle: "06".to_string(),
            forecast_hours: (0..=15).collect(),
            num_hours: 48,
            run_date: None,
            variables: Vec::new(),
            extra_variables: Vec::new(),
            concurrency: 4,
            out_of_domain_km: 50.0,
            use_index: true,
            staging_dir: None,
            db_file: PathBuf::from("data.db"),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| IngestionError::InvalidConfig(format!("config YAML: {}", e)))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IngestionError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Apply `HRRR_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply `HRRR_*` overrides from an arbitrary lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup("HRRR_BUCKET") {
            self.source.bucket = bucket;
        }
        if let Some(endpoint) = lookup("HRRR_ENDPOINT") {
            self.source.endpoint = Some(endpoint);
        }
        if let Some(file_type) = lookup("HRRR_FILE_TYPE") {
            self.file_type = file_type;
        }
        if let Some(cycle) = lookup("HRRR_CYCLE") {
            self.cycle = cycle;
        }
        if let Some(concurrency) = lookup("HRRR_CONCURRENCY") {
            self.concurrency = concurrency.trim().parse().map_err(|_| {
                IngestionError::InvalidConfig(format!(
                    "HRRR_CONCURRENCY must be a positive integer, got {:?}",
                    concurrency
                ))
            })?;
        }
        if let Some(db_file) = lookup("HRRR_DB_FILE") {
            self.db_file = PathBuf::from(db_file);
        }
        Ok(())
    }

    /// Check the whole configuration. Every later accessor assumes this passed.
    pub fn validate(&self) -> Result<()> {
        self.resolver()?;
        parse_cycle(&self.cycle)?;
        if let Some(date) = &self.run_date {
            parse_run_date(date)?;
        }
        if self.forecast_hours.is_empty() {
            return Err(IngestionError::InvalidConfig(
                "forecast hour range is empty".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(IngestionError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if !(self.out_of_domain_km.is_finite() && self.out_of_domain_km > 0.0) {
            return Err(IngestionError::InvalidConfig(format!(
                "out-of-domain threshold must be positive, got {}",
                self.out_of_domain_km
            )));
        }
        if self.key_template.trim().is_empty() {
            return Err(IngestionError::InvalidConfig(
                "object key template is empty".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(IngestionError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        validate_table_name(&self.table_name)
            .map_err(|e| IngestionError::InvalidConfig(e.to_string()))?;
        Ok(())
    }

    pub fn catalog(&self) -> Result<VariableCatalog> {
        VariableCatalog::with_extra(self.extra_variables.clone())
    }

    /// The requested variables, resolved against the catalog.
    pub fn resolver(&self) -> Result<VariableResolver> {
        self.catalog()?.select(&self.variables)
    }

    pub fn cycle_hour(&self) -> Result<u8> {
        parse_cycle(&self.cycle)
    }

    /// The configured run date, or the day before `now`.
    pub fn resolved_run_date(&self, now: DateTime<Utc>) -> Result<NaiveDate> {
        match &self.run_date {
            Some(date) => parse_run_date(date),
            None => Ok(default_run_date(now)),
        }
    }

    /// Every file this configuration asks for.
    pub fn plan(&self, now: DateTime<Utc>) -> Result<Vec<ForecastRunKey>> {
        Ok(plan_runs(
            self.resolved_run_date(now)?,
            self.num_hours,
            self.cycle_hour()?,
            &self.forecast_hours,
        ))
    }

    pub fn staging_options(&self) -> StagingOptions {
        StagingOptions {
            key_template: self.key_template.clone(),
            file_type: self.file_type.clone(),
            staging_dir: self.staging_dir.clone(),
            use_index: self.use_index,
            retry: self.retry.clone(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            concurrency: self.concurrency,
            out_of_domain_km: self.out_of_domain_km,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = IngestConfig::default();
        config.validate().unwrap();
        assert_eq!(config.source.bucket, "noaa-hrrr-bdp-pds");
        assert_eq!(config.forecast_hours.len(), 16);
        assert_eq!(config.resolver().unwrap().len(), 11);
        assert_eq!(config.retry.initial_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = IngestConfig::from_yaml_str(
            r#"
cycle: "12"
forecast_hours: [0, 1, 2]
variables: [temperature_2m, wind_gust]
extra_variables:
  - name: wind_gust
    discipline: 0
    category: 2
    number: 22
    level_type: 1
    idx_name: "GUST:surface"
source:
  bucket: my-mirror
retry:
  max_attempts: 2
"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.cycle_hour().unwrap(), 12);
        assert_eq!(config.source.bucket, "my-mirror");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.resolver().unwrap().len(), 2);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HRRR_BUCKET", "other"),
            ("HRRR_CYCLE", "00"),
            ("HRRR_CONCURRENCY", "8"),
            ("HRRR_DB_FILE", "/tmp/x.db"),
        ]
        .into_iter()
        .collect();

        let mut config = IngestConfig::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.source.bucket, "other");
        assert_eq!(config.cycle, "00");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.db_file, PathBuf::from("/tmp/x.db"));

        let err = config
            .apply_env_from(|k| (k == "HRRR_CONCURRENCY").then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
    }

    #[test]
    fn test_validation_failures() {
        let bad = |f: fn(&mut IngestConfig)| {
            let mut config = IngestConfig::default();
            f(&mut config);
            config.validate().unwrap_err()
        };

        assert_eq!(
            bad(|c| c.variables = vec!["nope".into()]).kind(),
            "unknown_variable"
        );
        assert_eq!(bad(|c| c.cycle = "25".into()).kind(), "invalid_config");
        assert_eq!(bad(|c| c.forecast_hours.clear()).kind(), "invalid_config");
        assert_eq!(bad(|c| c.concurrency = 0).kind(), "invalid_config");
        assert_eq!(bad(|c| c.out_of_domain_km = 0.0).kind(), "invalid_config");
        assert_eq!(bad(|c| c.table_name = "a b".into()).kind(), "invalid_config");
        assert_eq!(bad(|c| c.run_date = Some("2024".into())).kind(), "invalid_config");
    }

    #[test]
    fn test_plan_uses_yesterday_by_default() {
        let config = IngestConfig {
            num_hours: 0,
            forecast_hours: vec![0, 1],
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let plan = config.plan(now).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].run_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(plan[0].cycle, 6);
    }
}
