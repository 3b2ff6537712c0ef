//! GRIB2 section parsing.
//!
//! Every parser takes one complete section, header included, so indices
//! below are `octet - 1` as numbered in the WMO tables. Signed GRIB2
//! integers use sign-magnitude encoding, not two's complement.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{Grib2Error, Result};

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub total_length: u64,
}

/// GRIB2 parameter as (discipline, category, number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterId {
    pub discipline: u8,
    pub category: u8,
    pub number: u8,
}

impl ParameterId {
    pub const fn new(discipline: u8, category: u8, number: u8) -> Self {
        Self {
            discipline,
            category,
            number,
        }
    }
}

/// First fixed surface of a product: type (code table 4.5) and value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelDescriptor {
    pub surface_type: u8,
    /// `None` when the file marks the value as missing.
    pub value: Option<f64>,
}

impl LevelDescriptor {
    pub const fn new(surface_type: u8, value: Option<f64>) -> Self {
        Self {
            surface_type,
            value,
        }
    }
}

/// Section 3 grid templates that can produce cell coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum GridDefinition {
    /// Template 3.0
    LatLon(LatLonGrid),
    /// Template 3.30
    Lambert(LambertGrid),
    /// Any other template; geometry unknown.
    Unsupported { template: u16, num_points: usize },
}

/// Template 3.0 in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLonGrid {
    pub ni: usize,
    pub nj: usize,
    pub la1: f64,
    pub lo1: f64,
    pub la2: f64,
    pub lo2: f64,
    pub di: f64,
    pub dj: f64,
    pub scanning_mode: u8,
}

/// Template 3.30 in degrees and meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LambertGrid {
    pub nx: usize,
    pub ny: usize,
    pub la1: f64,
    pub lo1: f64,
    pub lov: f64,
    pub latin1: f64,
    pub latin2: f64,
    pub dx: f64,
    pub dy: f64,
    pub scanning_mode: u8,
}

impl GridDefinition {
    pub fn template(&self) -> u16 {
        match self {
            Self::LatLon(_) => 0,
            Self::Lambert(_) => 30,
            Self::Unsupported { template, .. } => *template,
        }
    }

    /// (columns, rows) for supported templates.
    pub fn shape(&self) -> Option<(usize, usize)> {
        match self {
            Self::LatLon(g) => Some((g.ni, g.nj)),
            Self::Lambert(g) => Some((g.nx, g.ny)),
            Self::Unsupported { .. } => None,
        }
    }

    pub fn num_points(&self) -> usize {
        match self {
            Self::LatLon(g) => g.ni * g.nj,
            Self::Lambert(g) => g.nx * g.ny,
            Self::Unsupported { num_points, .. } => *num_points,
        }
    }
}

/// Section 4 fields needed to select and time a message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDefinition {
    pub template: u16,
    pub category: u8,
    pub number: u8,
    pub level: Option<LevelDescriptor>,
    /// Offset of the forecast from the reference time.
    pub forecast: Option<Duration>,
    /// End of the statistical interval for template 4.8 products.
    pub interval_end: Option<DateTime<Utc>>,
}

// ===== Byte helpers =====

pub(crate) fn read_u16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

pub(crate) fn read_u32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Sign-magnitude 32-bit integer.
pub(crate) fn read_i32(b: &[u8], at: usize) -> i32 {
    let raw = read_u32(b, at);
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Sign-magnitude 8-bit integer.
fn read_i8(b: &[u8], at: usize) -> i8 {
    let magnitude = (b[at] & 0x7F) as i8;
    if b[at] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn require_len(section: &[u8], number: u8, needed: usize) -> Result<()> {
    if section.len() < needed {
        return Err(Grib2Error::InvalidSection {
            section: number,
            reason: format!("needs at least {} bytes, got {}", needed, section.len()),
        });
    }
    Ok(())
}

// ===== Parsing Functions =====

/// Parse Section 0 from the first 16 bytes of a message.
pub fn parse_indicator(data: &[u8; 16]) -> Result<Indicator> {
    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Octet 7: discipline, octet 8: edition, octets 9-16: total length
    let discipline = data[6];
    let edition = data[7];
    if edition != 2 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }

    let total_length = u64::from_be_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);

    Ok(Indicator {
        discipline,
        edition,
        total_length,
    })
}

/// Parse the reference time out of Section 1.
pub fn parse_reference_time(section: &[u8]) -> Result<DateTime<Utc>> {
    require_len(section, 1, 19)?;

    // Octets 13-14: year, 15: month, 16: day, 17: hour, 18: minute, 19: second
    let year = read_u16(section, 12);
    let (month, day, hour, minute, second) =
        (section[14], section[15], section[16], section[17], section[18]);

    Utc.with_ymd_and_hms(
        year as i32,
        month as u32,
        day as u32,
        hour as u32,
        minute as u32,
        second as u32,
    )
    .single()
    .ok_or_else(|| Grib2Error::InvalidSection {
        section: 1,
        reason: format!(
            "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
            year, month, day, hour, minute, second
        ),
    })
}

/// Parse Section 3 (Grid Definition).
pub fn parse_grid_definition(section: &[u8]) -> Result<GridDefinition> {
    require_len(section, 3, 14)?;

    // Octets 7-10: number of data points, octets 13-14: template number
    let num_points = read_u32(section, 6) as usize;
    let template = read_u16(section, 12);
    let gd = &section[14..];

    match template {
        0 => {
            // Template 3.0 relative to octet 15:
            // 16-19 Ni, 20-23 Nj, 24-27 basic angle, 28-31 subdivisions,
            // 32-35 La1, 36-39 Lo1, 40 flags, 41-44 La2, 45-48 Lo2,
            // 49-52 Di, 53-56 Dj, 57 scanning mode
            require_len(gd, 3, 58)?;
            let ni = read_u32(gd, 16) as usize;
            let nj = read_u32(gd, 20) as usize;

            let basic_angle = read_u32(gd, 24);
            let subdivisions = read_u32(gd, 28);
            // Angles are microdegrees unless a basic angle is given
            let degrees = |raw: f64| {
                if basic_angle == 0 || basic_angle == u32::MAX || subdivisions == u32::MAX {
                    raw / 1e6
                } else {
                    raw * basic_angle as f64 / subdivisions as f64
                }
            };

            let la1 = degrees(read_i32(gd, 32) as f64);
            let lo1 = degrees(read_i32(gd, 36) as f64);
            let la2 = degrees(read_i32(gd, 41) as f64);
            let lo2 = degrees(read_i32(gd, 45) as f64);

            let di_raw = read_u32(gd, 49);
            let dj_raw = read_u32(gd, 53);
            // Missing increments are implied by the corner points
            let di = if di_raw == u32::MAX {
                span(lo1, lo2, ni)
            } else {
                degrees(di_raw as f64)
            };
            let dj = if dj_raw == u32::MAX {
                span(la1, la2, nj)
            } else {
                degrees(dj_raw as f64)
            };

            check_points(ni * nj, num_points)?;
            Ok(GridDefinition::LatLon(LatLonGrid {
                ni,
                nj,
                la1,
                lo1,
                la2,
                lo2,
                di,
                dj,
                scanning_mode: gd[57],
            }))
        }
        30 => {
            // Template 3.30 relative to octet 15:
            // 16-19 Nx, 20-23 Ny, 24-27 La1, 28-31 Lo1, 32 flags, 33-36 LaD,
            // 37-40 LoV, 41-44 Dx (mm), 45-48 Dy (mm), 49 projection centre,
            // 50 scanning mode, 51-54 Latin1, 55-58 Latin2
            require_len(gd, 3, 59)?;
            let nx = read_u32(gd, 16) as usize;
            let ny = read_u32(gd, 20) as usize;

            check_points(nx * ny, num_points)?;
            Ok(GridDefinition::Lambert(LambertGrid {
                nx,
                ny,
                la1: read_i32(gd, 24) as f64 / 1e6,
                lo1: read_i32(gd, 28) as f64 / 1e6,
                lov: read_i32(gd, 37) as f64 / 1e6,
                dx: read_u32(gd, 41) as f64 / 1e3,
                dy: read_u32(gd, 45) as f64 / 1e3,
                scanning_mode: gd[50],
                latin1: read_i32(gd, 51) as f64 / 1e6,
                latin2: read_i32(gd, 55) as f64 / 1e6,
            }))
        }
        other => Ok(GridDefinition::Unsupported {
            template: other,
            num_points,
        }),
    }
}

fn span(first: f64, last: f64, n: usize) -> f64 {
    if n > 1 {
        (last - first).abs() / (n - 1) as f64
    } else {
        0.0
    }
}

fn check_points(shape: usize, declared: usize) -> Result<()> {
    if shape != declared {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: format!(
                "grid shape has {} points but section declares {}",
                shape, declared
            ),
        });
    }
    Ok(())
}

/// Parse Section 4 (Product Definition).
///
/// Templates 4.0 through 4.15 share the layout of the first 34 octets, so
/// level and forecast time are read for those only. Category and number sit
/// at the same place in every template.
pub fn parse_product_definition(section: &[u8]) -> Result<ProductDefinition> {
    require_len(section, 4, 11)?;

    // Octets 8-9: template, 10: parameter category, 11: parameter number
    let template = read_u16(section, 7);
    let category = section[9];
    let number = section[10];

    if template > 15 || section.len() < 34 {
        return Ok(ProductDefinition {
            template,
            category,
            number,
            level: None,
            forecast: None,
            interval_end: None,
        });
    }

    // Octet 18: time range unit, 19-22: forecast time
    let forecast = time_unit_seconds(section[17])
        .map(|unit| Duration::seconds(unit * read_i32(section, 18) as i64));

    // Octet 23: first surface type, 24: scale factor, 25-28: scaled value
    let surface_type = section[22];
    let level = if surface_type == 255 {
        None
    } else {
        let value = if section[23] == 0xFF && read_u32(section, 24) == u32::MAX {
            None
        } else {
            let scale = read_i8(section, 23) as i32;
            Some(read_i32(section, 24) as f64 / 10f64.powi(scale))
        };
        Some(LevelDescriptor::new(surface_type, value))
    };

    // Template 4.8 octets 35-41: end of overall time interval
    let interval_end = if template == 8 && section.len() >= 41 {
        Utc.with_ymd_and_hms(
            read_u16(section, 34) as i32,
            section[36] as u32,
            section[37] as u32,
            section[38] as u32,
            section[39] as u32,
            section[40] as u32,
        )
        .single()
    } else {
        None
    };

    Ok(ProductDefinition {
        template,
        category,
        number,
        level,
        forecast,
        interval_end,
    })
}

/// Seconds per unit for code table 4.4.
fn time_unit_seconds(unit: u8) -> Option<i64> {
    match unit {
        0 => Some(60),
        1 => Some(3_600),
        2 => Some(86_400),
        10 => Some(3 * 3_600),
        11 => Some(6 * 3_600),
        12 => Some(12 * 3_600),
        13 => Some(1),
        _ => None,
    }
}
