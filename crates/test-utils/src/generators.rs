//! Synthetic GRIB2 messages for tests.
//!
//! The builder writes edition 2 messages with a regular lat/lon (3.0) or a
//! Lambert conformal (3.30) grid, product template 4.0 and simple packing
//! (5.0). Several built messages can be concatenated into one file.

use std::path::{Path, PathBuf};

/// Grid definition written into section 3.
#[derive(Debug, Clone, Copy)]
pub enum GridTemplate {
    /// Template 3.0, angles in microdegrees.
    LatLon {
        ni: u32,
        nj: u32,
        la1: i32,
        lo1: i32,
        la2: i32,
        lo2: i32,
        di: u32,
        dj: u32,
        scanning_mode: u8,
    },
    /// Template 3.30, angles in microdegrees and spacing in millimetres.
    Lambert {
        nx: u32,
        ny: u32,
        la1: i32,
        lo1: i32,
        lov: i32,
        latin1: i32,
        latin2: i32,
        dx: u32,
        dy: u32,
        scanning_mode: u8,
    },
}

impl GridTemplate {
    fn size(&self) -> u32 {
        match *self {
            Self::LatLon { ni, nj, .. } => ni * nj,
            Self::Lambert { nx, ny, .. } => nx * ny,
        }
    }
}

/// Build a GRIB2 message with the specified parameters.
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    grid: GridTemplate,
    param_category: u8,
    param_number: u8,
    level_type: u8,
    level_scale: u8,
    level_value: u32,
    time_unit: u8,
    forecast_time: u32,
    data_values: Vec<f32>,
}

impl Grib2Builder {
    /// Regular lat/lon grid whose first point is (`lat0`, `lon0`) and whose
    /// latitudes increase row by row. Angles in degrees.
    pub fn latlon(ni: u32, nj: u32, lat0: f64, lon0: f64, step: f64) -> Self {
        let micro = |deg: f64| (deg * 1e6).round() as i32;
        let grid = GridTemplate::LatLon {
            ni,
            nj,
            la1: micro(lat0),
            lo1: micro(lon0),
            la2: micro(lat0 + step * (nj.max(1) - 1) as f64),
            lo2: micro(lon0 + step * (ni.max(1) - 1) as f64),
            di: micro(step) as u32,
            dj: micro(step) as u32,
            scanning_mode: 0b0100_0000, // +i, +j, i consecutive
        };
        Self::with_template(grid)
    }

    /// A corner of the HRRR Lambert grid with `nx` by `ny` cells.
    pub fn hrrr_lambert(nx: u32, ny: u32) -> Self {
        let grid = GridTemplate::Lambert {
            nx,
            ny,
            la1: 21_138_123,
            lo1: 237_280_472,
            lov: 262_500_000,
            latin1: 38_500_000,
            latin2: 38_500_000,
            dx: 3_000_000,
            dy: 3_000_000,
            scanning_mode: 0b0100_0000,
        };
        Self::with_template(grid)
    }

    pub fn with_template(grid: GridTemplate) -> Self {
        let n = grid.size() as usize;
        Self {
            discipline: 0,
            center: 7, // NCEP
            year: 2024,
            month: 1,
            day: 1,
            hour: 6,
            grid,
            param_category: 0,
            param_number: 0, // TMP
            level_type: 103, // m above ground
            level_scale: 0,
            level_value: 2,
            time_unit: 1, // hours
            forecast_time: 0,
            data_values: vec![288.15; n],
        }
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    pub fn with_parameter(mut self, discipline: u8, category: u8, number: u8) -> Self {
        self.discipline = discipline;
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_scale = 0;
        self.level_value = level_value;
        self
    }

    pub fn with_scaled_level(mut self, level_type: u8, scale: u8, scaled_value: u32) -> Self {
        self.level_type = level_type;
        self.level_scale = scale;
        self.level_value = scaled_value;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.time_unit = 1;
        self.forecast_time = hour;
        self
    }

    pub fn with_forecast_minutes(mut self, minutes: u32) -> Self {
        self.time_unit = 0;
        self.forecast_time = minutes;
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; self.grid.size() as usize];
        self
    }

    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    /// Build the complete GRIB2 message bytes.
    pub fn build(&self) -> Vec<u8> {
        let sections = [
            self.build_section1(),
            self.build_section3(),
            self.build_section4(),
            self.build_section5(),
            self.build_section6(),
            self.build_section7(),
        ];

        let message_length = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(message_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(self.discipline);
        message.push(2); // Edition 2
        message.extend_from_slice(&(message_length as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");

        message
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);

        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Sub-center
        section.push(2); // Master table version
        section.push(1); // Local table version
        section.push(1); // Significance of reference time (start of forecast)

        section.extend_from_slice(&self.year.to_be_bytes());
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0); // Minute
        section.push(0); // Second

        section.push(0); // Production status (operational)
        section.push(1); // Type of data (forecast)

        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let (template, payload) = match self.grid {
            GridTemplate::LatLon {
                ni,
                nj,
                la1,
                lo1,
                la2,
                lo2,
                di,
                dj,
                scanning_mode,
            } => {
                let mut gd = earth_shape();
                gd.extend_from_slice(&ni.to_be_bytes());
                gd.extend_from_slice(&nj.to_be_bytes());
                gd.extend_from_slice(&0u32.to_be_bytes()); // Basic angle
                gd.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // Subdivisions
                gd.extend_from_slice(&sign_magnitude_32(la1));
                gd.extend_from_slice(&sign_magnitude_32(lo1));
                gd.push(48); // Resolution and component flags
                gd.extend_from_slice(&sign_magnitude_32(la2));
                gd.extend_from_slice(&sign_magnitude_32(lo2));
                gd.extend_from_slice(&di.to_be_bytes());
                gd.extend_from_slice(&dj.to_be_bytes());
                gd.push(scanning_mode);
                (0u16, gd)
            }
            GridTemplate::Lambert {
                nx,
                ny,
                la1,
                lo1,
                lov,
                latin1,
                latin2,
                dx,
                dy,
                scanning_mode,
            } => {
                let mut gd = earth_shape();
                gd.extend_from_slice(&nx.to_be_bytes());
                gd.extend_from_slice(&ny.to_be_bytes());
                gd.extend_from_slice(&sign_magnitude_32(la1));
                gd.extend_from_slice(&sign_magnitude_32(lo1));
                gd.push(8); // Resolution and component flags
                gd.extend_from_slice(&sign_magnitude_32(latin1)); // LaD
                gd.extend_from_slice(&sign_magnitude_32(lov));
                gd.extend_from_slice(&dx.to_be_bytes());
                gd.extend_from_slice(&dy.to_be_bytes());
                gd.push(0); // Projection centre flag
                gd.push(scanning_mode);
                gd.extend_from_slice(&sign_magnitude_32(latin1));
                gd.extend_from_slice(&sign_magnitude_32(latin2));
                gd.extend_from_slice(&sign_magnitude_32(-90_000_000)); // Southern pole lat
                gd.extend_from_slice(&0u32.to_be_bytes()); // Southern pole lon
                (30u16, gd)
            }
        };

        let mut section = Vec::new();
        section.extend_from_slice(&(14 + payload.len() as u32).to_be_bytes());
        section.push(3);
        section.push(0); // Source of grid definition
        section.extend_from_slice(&self.grid.size().to_be_bytes());
        section.push(0); // Number of octets for optional list
        section.push(0); // Interpretation of optional list
        section.extend_from_slice(&template.to_be_bytes());
        section.extend_from_slice(&payload);
        section
    }

    fn build_section4(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&34u32.to_be_bytes());
        section.push(4);

        section.extend_from_slice(&0u16.to_be_bytes()); // Number of coordinate values
        section.extend_from_slice(&0u16.to_be_bytes()); // Product definition template 4.0

        section.push(self.param_category);
        section.push(self.param_number);
        section.push(2); // Type of generating process (forecast)
        section.push(0); // Background generating process
        section.push(83); // Analysis or forecast process (HRRR)
        section.extend_from_slice(&0u16.to_be_bytes()); // Hours of cutoff
        section.push(0); // Minutes of cutoff
        section.push(self.time_unit);
        section.extend_from_slice(&self.forecast_time.to_be_bytes());

        section.push(self.level_type);
        section.push(self.level_scale);
        section.extend_from_slice(&self.level_value.to_be_bytes());

        section.push(255); // Type of second fixed surface (none)
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());

        section
    }

    fn packing(&self) -> (f32, i16, u8) {
        let (min_val, max_val) = self.data_values.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY),
            |(min, max), &v| (min.min(v), max.max(v)),
        );
        let range = max_val - min_val;
        if range == 0.0 || !range.is_finite() {
            return (min_val, 0, 0);
        }
        // value = R + X * 2^E with X in 16 bits
        let binary_scale_factor = (range / 65535.0).log2().ceil() as i16;
        (min_val, binary_scale_factor, 16)
    }

    fn build_section5(&self) -> Vec<u8> {
        let (reference_value, binary_scale_factor, bits_per_value) = self.packing();

        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);
        section.extend_from_slice(&(self.data_values.len() as u32).to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 5.0

        section.extend_from_slice(&reference_value.to_be_bytes());
        section.extend_from_slice(&sign_magnitude_16(binary_scale_factor));
        section.extend_from_slice(&0u16.to_be_bytes()); // Decimal scale factor
        section.push(bits_per_value);
        section.push(0); // Original field type (floating point)

        section
    }

    fn build_section6(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&6u32.to_be_bytes());
        section.push(6);
        section.push(255); // No bitmap
        section
    }

    fn build_section7(&self) -> Vec<u8> {
        let (reference_value, binary_scale_factor, bits_per_value) = self.packing();

        let mut packed = Vec::new();
        if bits_per_value > 0 {
            let scale = 2.0_f32.powi(binary_scale_factor as i32);
            for &val in &self.data_values {
                let x = ((val - reference_value) / scale).round() as u16;
                packed.extend_from_slice(&x.to_be_bytes());
            }
        }

        let mut section = Vec::new();
        section.extend_from_slice(&(5 + packed.len() as u32).to_be_bytes());
        section.push(7);
        section.extend_from_slice(&packed);
        section
    }
}

/// Shape of earth 6 (sphere of radius 6371229 m) with empty radius/axis fields.
fn earth_shape() -> Vec<u8> {
    let mut gd = vec![6, 0];
    gd.extend_from_slice(&0u32.to_be_bytes());
    gd.push(0);
    gd.extend_from_slice(&0u32.to_be_bytes());
    gd.push(0);
    gd.extend_from_slice(&0u32.to_be_bytes());
    gd
}

/// GRIB2 signed integers keep the sign in the top bit.
fn sign_magnitude_32(v: i32) -> [u8; 4] {
    if v < 0 {
        (v.unsigned_abs() | 0x8000_0000).to_be_bytes()
    } else {
        (v as u32).to_be_bytes()
    }
}

fn sign_magnitude_16(v: i16) -> [u8; 2] {
    if v < 0 {
        (v.unsigned_abs() | 0x8000).to_be_bytes()
    } else {
        (v as u16).to_be_bytes()
    }
}

/// Concatenate built messages into one file body.
pub fn concat_messages(messages: &[Vec<u8>]) -> Vec<u8> {
    messages.concat()
}

/// Write `contents` to `name` inside `dir` and return the path.
pub fn write_file(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to write test file");
    path
}

/// Render an HRRR-style `.idx` inventory for concatenated messages.
///
/// `entries` pairs each message's byte length with its `NAME:LEVEL` field.
pub fn idx_inventory(reference: &str, forecast_hour: u32, entries: &[(usize, &str)]) -> String {
    let mut offset = 0;
    let mut out = String::new();
    for (n, (len, name_level)) in entries.iter().enumerate() {
        let fcst = if forecast_hour == 0 {
            "anl".to_string()
        } else {
            format!("{} hour fcst", forecast_hour)
        };
        out.push_str(&format!(
            "{}:{}:d={}:{}:{}:\n",
            n + 1,
            offset,
            reference,
            name_level,
            fcst
        ));
        offset += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_latlon_message() {
        let bytes = Grib2Builder::latlon(3, 3, 10.0, 20.0, 1.0).build();

        assert_eq!(&bytes[0..4], b"GRIB");
        assert_eq!(bytes[7], 2);
        let total = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(total as usize, bytes.len());
        assert_eq!(&bytes[bytes.len() - 4..], b"7777");
    }

    #[test]
    fn test_section3_lengths() {
        let latlon = Grib2Builder::latlon(2, 2, 0.0, 0.0, 1.0);
        assert_eq!(latlon.build_section3().len(), 72);

        let lambert = Grib2Builder::hrrr_lambert(4, 3);
        assert_eq!(lambert.build_section3().len(), 81);
    }

    #[test]
    fn test_sign_magnitude() {
        assert_eq!(sign_magnitude_32(-1), [0x80, 0, 0, 1]);
        assert_eq!(sign_magnitude_32(5), [0, 0, 0, 5]);
        assert_eq!(sign_magnitude_16(-3), [0x80, 3]);
    }

    #[test]
    fn test_constant_data_has_no_payload() {
        let builder = Grib2Builder::latlon(4, 4, 0.0, 0.0, 1.0).with_constant_value(1.5);
        assert_eq!(builder.build_section7().len(), 5);
    }

    #[test]
    fn test_idx_inventory_offsets() {
        let idx = idx_inventory("2024010106", 5, &[(100, "TMP:2 m above ground"), (50, "PRES:surface")]);
        let lines: Vec<&str> = idx.lines().collect();
        assert_eq!(lines[0], "1:0:d=2024010106:TMP:2 m above ground:5 hour fcst:");
        assert_eq!(lines[1], "2:100:d=2024010106:PRES:surface:5 hour fcst:");
    }
}
