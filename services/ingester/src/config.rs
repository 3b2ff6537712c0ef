//! Ingester configuration.
//!
//! Layers, lowest precedence first: built-in defaults, the YAML file,
//! `HRRR_*` environment variables, then command-line flags.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use ingestion::{parse_forecast_hours, parse_variable_list, IngestConfig, VariableCatalog};

use crate::Args;

/// Build and validate the run configuration.
pub fn load(args: &Args) -> Result<IngestConfig> {
    load_with_env(args, |name| std::env::var(name).ok())
}

fn load_with_env<F>(args: &Args, lookup: F) -> Result<IngestConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &args.config {
        Some(path) => IngestConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => IngestConfig::default(),
    };

    config.apply_env_from(lookup)?;
    apply_args(&mut config, args)?;
    config.validate()?;
    Ok(config)
}

fn apply_args(config: &mut IngestConfig, args: &Args) -> Result<()> {
    if let Some(run_date) = &args.run_date {
        config.run_date = Some(run_date.clone());
    }
    if let Some(variables) = &args.variables {
        config.variables = parse_variable_list(variables);
    }
    if let Some(num_hours) = args.num_hours {
        config.num_hours = num_hours;
    }
    if let Some(cycle) = &args.cycle {
        config.cycle = cycle.clone();
    }
    if let Some(hours) = &args.forecast_hours {
        config.forecast_hours = parse_forecast_hours(hours)?;
    }
    if let Some(file_type) = &args.file_type {
        config.file_type = file_type.clone();
    }
    if let Some(db_file) = &args.db_file {
        config.db_file = db_file.clone();
    }
    if let Some(table_name) = &args.table_name {
        config.table_name = table_name.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(km) = args.out_of_domain_km {
        config.out_of_domain_km = km;
    }
    if let Some(dir) = &args.staging_dir {
        config.staging_dir = Some(dir.clone());
    }
    if args.no_index {
        config.use_index = false;
    }
    Ok(())
}

/// Table of catalog entries for `--list-variables`.
pub fn render_catalog(catalog: &VariableCatalog) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<38} {:<12} {:<10} {}", "VARIABLE", "PARAMETER", "LEVEL", "IDX NAME");
    for spec in catalog.specs() {
        let level = match spec.level_value {
            Some(value) => format!("{}/{}", spec.level_type, value),
            None => spec.level_type.to_string(),
        };
        let _ = writeln!(
            out,
            "{:<38} {:<12} {:<10} {}",
            spec.name,
            format!("{}.{}.{}", spec.discipline, spec.category, spec.number),
            level,
            spec.idx_name
        );
    }
    out
}
