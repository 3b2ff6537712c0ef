//! Short names and level descriptions for log output and `.idx` matching.
//!
//! Names follow the NCEP inventory convention used in HRRR `.idx` files,
//! e.g. `TMP` at `2 m above ground`.

use crate::sections::{LevelDescriptor, ParameterId};

/// NCEP short name for a parameter, when known.
pub fn parameter_short_name(param: &ParameterId) -> Option<&'static str> {
    let name = match (param.discipline, param.category, param.number) {
        // Temperature
        (0, 0, 0) => "TMP",
        (0, 0, 6) => "DPT",
        // Moisture
        (0, 1, 0) => "SPFH",
        (0, 1, 1) => "RH",
        (0, 1, 8) => "APCP",
        // Momentum
        (0, 2, 2) => "UGRD",
        (0, 2, 3) => "VGRD",
        (0, 2, 22) => "GUST",
        // Mass
        (0, 3, 0) => "PRES",
        (0, 3, 1) => "PRMSL",
        (0, 3, 5) => "HGT",
        // Short-wave radiation, NCEP local
        (0, 4, 0) => "NSWRS",
        (0, 4, 7) => "DSWRF",
        (0, 4, 200) => "VBDSF",
        (0, 4, 201) => "VDDSF",
        // Cloud
        (0, 6, 1) => "TCDC",
        // Land surface
        (2, 0, 0) => "LAND",
        (2, 0, 1) => "SFCR",
        _ => return None,
    };
    Some(name)
}

/// Level text in `.idx` style.
pub fn level_description(level: &LevelDescriptor) -> String {
    let value = level
        .value
        .map(format_level_value)
        .unwrap_or_else(|| "?".to_string());
    match level.surface_type {
        1 => "surface".to_string(),
        2 => "cloud base".to_string(),
        3 => "cloud top".to_string(),
        100 => match level.value {
            Some(pa) => format!("{} mb", format_level_value(pa / 100.0)),
            None => "? mb".to_string(),
        },
        101 => "mean sea level".to_string(),
        102 => format!("{} m above mean sea level", value),
        103 => format!("{} m above ground", value),
        200 => "entire atmosphere".to_string(),
        other => format!("level type {} value {}", other, value),
    }
}

fn format_level_value(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}
