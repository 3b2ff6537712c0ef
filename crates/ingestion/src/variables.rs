//! Variable catalog: user-facing names to GRIB2 selectors and back.
//!
//! The catalog is validated when it is built, so an unknown or ambiguous
//! variable stops the process before any download starts. During decoding
//! the same table is consulted in the other direction: given a message's
//! parameter and level, which requested variable (if any) does it carry?

use std::collections::{HashMap, HashSet};

use grib2_parser::{LevelDescriptor, ParameterId};
use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, Result};

/// GRIB2 fixed surface types (code table 4.5).
pub mod level_types {
    /// Ground or water surface
    pub const SURFACE: u8 = 1;
    /// Specified height above ground, in meters
    pub const HEIGHT_ABOVE_GROUND: u8 = 103;
}

/// One catalog entry, as written in YAML configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub discipline: u8,
    pub category: u8,
    pub number: u8,
    pub level_type: u8,
    /// Required level value; `None` accepts any value of `level_type`
    #[serde(default)]
    pub level_value: Option<f64>,
    /// `NAME:LEVEL` as it appears in the `.idx` inventory
    pub idx_name: String,
}

impl VariableSpec {
    pub fn selector(&self) -> VariableSelector {
        VariableSelector {
            parameter: ParameterId::new(self.discipline, self.category, self.number),
            level_type: self.level_type,
            level_value: self.level_value,
        }
    }
}

/// What a message must carry to satisfy a variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableSelector {
    pub parameter: ParameterId,
    pub level_type: u8,
    pub level_value: Option<f64>,
}

impl VariableSelector {
    pub fn matches(&self, parameter: &ParameterId, level: Option<&LevelDescriptor>) -> bool {
        let Some(level) = level else {
            return false;
        };
        if *parameter != self.parameter || level.surface_type != self.level_type {
            return false;
        }
        match (self.level_value, level.value) {
            (None, _) => true,
            (Some(want), Some(got)) => (want - got).abs() < 1e-6,
            (Some(_), None) => false,
        }
    }

    fn overlaps(&self, other: &VariableSelector) -> bool {
        self.parameter == other.parameter
            && self.level_type == other.level_type
            && match (self.level_value, other.level_value) {
                (Some(a), Some(b)) => (a - b).abs() < 1e-6,
                _ => true,
            }
    }

    fn bucket(&self) -> (ParameterId, u8) {
        (self.parameter, self.level_type)
    }
}

type Builtin = (&'static str, (u8, u8, u8), u8, Option<f64>, &'static str);

const HRRR_VARIABLES: &[Builtin] = &[
    ("surface_pressure", (0, 3, 0), level_types::SURFACE, None, "PRES:surface"),
    ("surface_roughness", (2, 0, 1), level_types::SURFACE, None, "SFCR:surface"),
    ("visible_beam_downward_solar_flux", (0, 4, 200), level_types::SURFACE, None, "VBDSF:surface"),
    ("visible_diffuse_downward_solar_flux", (0, 4, 201), level_types::SURFACE, None, "VDDSF:surface"),
    ("temperature_2m", (0, 0, 0), level_types::HEIGHT_ABOVE_GROUND, Some(2.0), "TMP:2 m above ground"),
    ("dewpoint_2m", (0, 0, 6), level_types::HEIGHT_ABOVE_GROUND, Some(2.0), "DPT:2 m above ground"),
    ("relative_humidity_2m", (0, 1, 1), level_types::HEIGHT_ABOVE_GROUND, Some(2.0), "RH:2 m above ground"),
    ("u_component_wind_10m", (0, 2, 2), level_types::HEIGHT_ABOVE_GROUND, Some(10.0), "UGRD:10 m above ground"),
    ("v_component_wind_10m", (0, 2, 3), level_types::HEIGHT_ABOVE_GROUND, Some(10.0), "VGRD:10 m above ground"),
    ("u_component_wind_80m", (0, 2, 2), level_types::HEIGHT_ABOVE_GROUND, Some(80.0), "UGRD:80 m above ground"),
    ("v_component_wind_80m", (0, 2, 3), level_types::HEIGHT_ABOVE_GROUND, Some(80.0), "VGRD:80 m above ground"),
];

/// Built-in HRRR surface variables.
pub fn hrrr_variables() -> Vec<VariableSpec> {
    HRRR_VARIABLES
        .iter()
        .map(|&(name, (discipline, category, number), level_type, level_value, idx_name)| {
            VariableSpec {
                name: name.to_string(),
                discipline,
                category,
                number,
                level_type,
                level_value,
                idx_name: idx_name.to_string(),
            }
        })
        .collect()
}

/// Split a comma-separated variable list, trimming entries and dropping
/// blanks and repeats. Order of first appearance is kept.
pub fn parse_variable_list(list: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

/// Names, inventory names and selectors must each be unique.
fn validate(specs: &[VariableSpec]) -> Result<()> {
    let mut names = HashSet::new();
    let mut idx_names = HashSet::new();

    for (i, spec) in specs.iter().enumerate() {
        if spec.name.trim().is_empty() {
            return Err(IngestionError::InvalidConfig(
                "variable with an empty name".to_string(),
            ));
        }
        if !names.insert(spec.name.as_str()) {
            return Err(IngestionError::InvalidConfig(format!(
                "variable {} is defined twice",
                spec.name
            )));
        }
        if !idx_names.insert(spec.idx_name.as_str()) {
            return Err(IngestionError::InvalidConfig(format!(
                "inventory name {:?} is used by more than one variable",
                spec.idx_name
            )));
        }
        let selector = spec.selector();
        if let Some(other) = specs[..i]
            .iter()
            .find(|other| other.selector().overlaps(&selector))
        {
            return Err(IngestionError::InvalidConfig(format!(
                "variables {} and {} select the same GRIB2 field",
                other.name, spec.name
            )));
        }
    }
    Ok(())
}

/// Bidirectional lookup over a set of variables.
#[derive(Debug, Clone)]
struct Table {
    specs: Vec<VariableSpec>,
    by_name: HashMap<String, usize>,
    by_bucket: HashMap<(ParameterId, u8), Vec<usize>>,
}

impl Table {
    fn build(specs: Vec<VariableSpec>) -> Result<Self> {
        validate(&specs)?;
        Ok(Self::index(specs))
    }

    fn index(specs: Vec<VariableSpec>) -> Self {
        let mut by_name = HashMap::new();
        let mut by_bucket: HashMap<(ParameterId, u8), Vec<usize>> = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            by_name.insert(spec.name.clone(), i);
            by_bucket.entry(spec.selector().bucket()).or_default().push(i);
        }
        Self {
            specs,
            by_name,
            by_bucket,
        }
    }

    fn get(&self, name: &str) -> Option<&VariableSpec> {
        self.by_name.get(name).map(|&i| &self.specs[i])
    }

    fn match_message(
        &self,
        parameter: &ParameterId,
        level: Option<&LevelDescriptor>,
    ) -> Option<&VariableSpec> {
        let surface_type = level?.surface_type;
        self.by_bucket
            .get(&(*parameter, surface_type))?
            .iter()
            .map(|&i| &self.specs[i])
            .find(|spec| spec.selector().matches(parameter, level))
    }
}

/// Every variable the process knows about.
#[derive(Debug, Clone)]
pub struct VariableCatalog {
    table: Table,
}

impl VariableCatalog {
    /// The built-in HRRR table.
    pub fn hrrr() -> Self {
        Self {
            table: Table::index(hrrr_variables()),
        }
    }

    /// The built-in table plus configured additions.
    pub fn with_extra(extra: Vec<VariableSpec>) -> Result<Self> {
        let mut specs = hrrr_variables();
        specs.extend(extra);
        Ok(Self {
            table: Table::build(specs)?,
        })
    }

    pub fn get(&self, name: &str) -> Option<&VariableSpec> {
        self.table.get(name)
    }

    /// Selector for a user-facing name.
    pub fn resolve(&self, name: &str) -> Result<VariableSelector> {
        self.get(name)
            .map(VariableSpec::selector)
            .ok_or_else(|| IngestionError::UnknownVariable(vec![name.to_string()]))
    }

    pub fn specs(&self) -> &[VariableSpec] {
        &self.table.specs
    }

    pub fn len(&self) -> usize {
        self.table.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.specs.is_empty()
    }

    /// Narrow the catalog to the requested names. An empty request selects
    /// everything; unknown names are reported together.
    pub fn select(&self, requested: &[String]) -> Result<VariableResolver> {
        if requested.is_empty() {
            return Ok(VariableResolver {
                table: self.table.clone(),
            });
        }

        let unknown: Vec<String> = requested
            .iter()
            .filter(|name| self.get(name).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(IngestionError::UnknownVariable(unknown));
        }

        let mut seen = HashSet::new();
        let specs = requested
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .filter_map(|name| self.get(name).cloned())
            .collect();
        Ok(VariableResolver {
            table: Table::build(specs)?,
        })
    }
}

impl Default for VariableCatalog {
    fn default() -> Self {
        Self::hrrr()
    }
}

/// The variables requested for one run.
#[derive(Debug, Clone)]
pub struct VariableResolver {
    table: Table,
}

impl VariableResolver {
    pub fn requested(&self) -> &[VariableSpec] {
        &self.table.specs
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.specs.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.table.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.specs.is_empty()
    }

    pub fn resolve(&self, name: &str) -> Option<VariableSelector> {
        self.table.get(name).map(VariableSpec::selector)
    }

    /// The requested variable a message satisfies, if any. Messages that
    /// match nothing are rejected by a single hash lookup.
    pub fn match_message(
        &self,
        parameter: &ParameterId,
        level: Option<&LevelDescriptor>,
    ) -> Option<&VariableSpec> {
        self.table.match_message(parameter, level)
    }

    /// Whether an `.idx` `NAME:LEVEL` entry belongs to a requested variable.
    pub fn wants_inventory_entry(&self, name_level: &str) -> bool {
        self.table.specs.iter().any(|s| s.idx_name == name_level)
    }
}
