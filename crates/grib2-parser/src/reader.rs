//! Forward-only walk over the messages of a local GRIB2 file.
//!
//! The walker reads only section headers plus sections 1, 3 and 4, and
//! seeks over bitmaps and packed data. Values are decoded on request through
//! the `grib` crate, so messages nobody asked for never get unpacked.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use projection::GridFingerprint;
use tracing::{debug, trace};

use crate::grid::{grid_coordinates, GridCoordinates};
use crate::sections::{
    parse_grid_definition, parse_indicator, parse_product_definition, parse_reference_time,
    read_u32, GridDefinition, LevelDescriptor, ParameterId, ProductDefinition,
};
use crate::tables::{level_description, parameter_short_name};
use crate::{Grib2Error, Result};

/// Everything needed to select a message and place its values in time and space.
#[derive(Debug, Clone)]
pub struct MessageMetadata {
    /// Position among all submessages of the file, starting at 0.
    pub ordinal: usize,
    /// Byte offset of the enclosing GRIB message.
    pub offset: u64,
    pub parameter: ParameterId,
    pub level: Option<LevelDescriptor>,
    pub reference_time: DateTime<Utc>,
    pub forecast: Option<Duration>,
    pub valid_time: DateTime<Utc>,
    pub grid: Arc<GridDefinition>,
    pub fingerprint: GridFingerprint,
}

impl MessageMetadata {
    pub fn num_points(&self) -> usize {
        self.grid.num_points()
    }
}

impl fmt::Display for MessageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match parameter_short_name(&self.parameter) {
            Some(name) => write!(f, "{}", name)?,
            None => write!(
                f,
                "P{}_{}_{}",
                self.parameter.discipline, self.parameter.category, self.parameter.number
            )?,
        }
        match &self.level {
            Some(level) => write!(f, ":{}", level_description(level)),
            None => write!(f, ":unknown level"),
        }
    }
}

/// State carried between sections of the message being walked.
struct MessageState {
    start: u64,
    end: u64,
    discipline: u8,
    reference_time: Option<DateTime<Utc>>,
    grid: Option<(Arc<GridDefinition>, GridFingerprint)>,
    product: Option<ProductDefinition>,
}

type DecodedFile = grib::Grib2<grib::SeekableGrib2Reader<BufReader<File>>>;

/// A local GRIB2 file opened for a single forward pass.
pub struct Grib2File {
    path: PathBuf,
    reader: BufReader<File>,
    file_len: u64,
    position: u64,
    message: Option<MessageState>,
    next_ordinal: usize,
    finished: bool,
    /// Submessage index for value decoding, parsed on first use.
    decoded: Option<DecodedFile>,
}

impl Grib2File {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        debug!(path = %path.display(), size = file_len, "Opened GRIB2 file");

        Ok(Self {
            path,
            reader: BufReader::new(file),
            file_len,
            position: 0,
            message: None,
            next_ordinal: 0,
            finished: false,
            decoded: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Advance to the next submessage. `Ok(None)` marks the end of the file.
    pub fn next_message(&mut self) -> Result<Option<MessageMetadata>> {
        if self.finished {
            return Ok(None);
        }
        match self.walk() {
            Ok(Some(meta)) => Ok(Some(meta)),
            Ok(None) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    fn walk(&mut self) -> Result<Option<MessageMetadata>> {
        loop {
            let end = match &self.message {
                Some(state) => state.end,
                None => {
                    if self.position == self.file_len {
                        return Ok(None);
                    }
                    self.begin_message()?;
                    continue;
                }
            };

            let mut header = [0u8; 4];
            self.read_exact(&mut header)?;
            if &header == b"7777" {
                if self.position != end {
                    return Err(Grib2Error::InvalidFormat(format!(
                        "end marker at byte {} but message ends at {}",
                        self.position, end
                    )));
                }
                self.message = None;
                continue;
            }

            let length = read_u32(&header, 0) as u64;
            let mut number = [0u8; 1];
            self.read_exact(&mut number)?;
            let number = number[0];

            let section_start = self.position - 5;
            if length < 5 || section_start + length > end {
                return Err(Grib2Error::InvalidSection {
                    section: number,
                    reason: format!("length {} overruns message ending at {}", length, end),
                });
            }
            trace!(section = number, length, offset = section_start, "Section");

            match number {
                1 | 3 | 4 => {
                    let mut section = vec![0u8; length as usize];
                    section[..4].copy_from_slice(&header);
                    section[4] = number;
                    self.read_exact(&mut section[5..])?;
                    self.absorb_section(number, &section)?;
                }
                2 | 5 | 6 => self.skip(length - 5)?,
                7 => {
                    self.skip(length - 5)?;
                    return self.emit().map(Some);
                }
                other => {
                    return Err(Grib2Error::InvalidSection {
                        section: other,
                        reason: "unknown section number".to_string(),
                    })
                }
            }
        }
    }

    fn begin_message(&mut self) -> Result<()> {
        let start = self.position;
        let mut indicator = [0u8; 16];
        self.read_exact(&mut indicator)?;
        let indicator = parse_indicator(&indicator)?;

        if indicator.total_length < 16 + 4 {
            return Err(Grib2Error::InvalidFormat(format!(
                "message at byte {} declares length {}",
                start, indicator.total_length
            )));
        }
        let end = start
            .checked_add(indicator.total_length)
            .ok_or(Grib2Error::Truncated { offset: self.file_len })?;
        if end > self.file_len {
            return Err(Grib2Error::Truncated { offset: self.file_len });
        }

        self.message = Some(MessageState {
            start,
            end,
            discipline: indicator.discipline,
            reference_time: None,
            grid: None,
            product: None,
        });
        Ok(())
    }

    fn absorb_section(&mut self, number: u8, section: &[u8]) -> Result<()> {
        let state = self
            .message
            .as_mut()
            .ok_or_else(|| Grib2Error::InvalidFormat("section outside a message".to_string()))?;

        match number {
            1 => state.reference_time = Some(parse_reference_time(section)?),
            3 => {
                let grid = parse_grid_definition(section)?;
                let fingerprint = GridFingerprint::from_definition(grid.template(), &section[5..]);
                state.grid = Some((Arc::new(grid), fingerprint));
            }
            4 => state.product = Some(parse_product_definition(section)?),
            _ => {}
        }
        Ok(())
    }

    fn emit(&mut self) -> Result<MessageMetadata> {
        let ordinal = self.next_ordinal;
        let state = self
            .message
            .as_ref()
            .ok_or_else(|| Grib2Error::InvalidFormat("data section outside a message".to_string()))?;

        let missing = |what: &str| {
            Grib2Error::InvalidFormat(format!(
                "message at byte {} has a data section before its {}",
                state.start, what
            ))
        };
        let reference_time = state.reference_time.ok_or_else(|| missing("identification"))?;
        let (grid, fingerprint) = state.grid.clone().ok_or_else(|| missing("grid definition"))?;
        let product = state.product.as_ref().ok_or_else(|| missing("product definition"))?;

        let valid_time = product
            .interval_end
            .unwrap_or_else(|| reference_time + product.forecast.unwrap_or_else(Duration::zero));

        self.next_ordinal += 1;
        Ok(MessageMetadata {
            ordinal,
            offset: state.start,
            parameter: ParameterId::new(state.discipline, product.category, product.number),
            level: product.level,
            reference_time,
            forecast: product.forecast,
            valid_time,
            grid,
            fingerprint,
        })
    }

    /// Cell coordinates of a message's grid, in storage order.
    pub fn coordinates(&self, meta: &MessageMetadata) -> Result<GridCoordinates> {
        grid_coordinates(&meta.grid)
    }

    /// Decode the values of one submessage. Missing points come back as NaN.
    ///
    /// The first call indexes every submessage of the file; later calls
    /// only unpack their own data section.
    pub fn values(&mut self, meta: &MessageMetadata) -> Result<Vec<f32>> {
        let decode_err = |reason: String| Grib2Error::Decode {
            ordinal: meta.ordinal,
            reason,
        };

        let grib2 = match self.decoded.take() {
            Some(decoded) => decoded,
            None => {
                let file = File::open(&self.path)?;
                let decoded =
                    grib::from_reader(BufReader::new(file)).map_err(|e| decode_err(e.to_string()))?;
                debug!(path = %self.path.display(), "Indexed GRIB2 submessages for decoding");
                decoded
            }
        };
        let grib2 = self.decoded.insert(grib2);

        let (_, submessage) = grib2
            .iter()
            .nth(meta.ordinal)
            .ok_or_else(|| decode_err("submessage not found".to_string()))?;

        let decoder =
            grib::Grib2SubmessageDecoder::from(submessage).map_err(|e| decode_err(e.to_string()))?;
        let values: Vec<f32> = decoder
            .dispatch()
            .map_err(|e| decode_err(e.to_string()))?
            .collect();

        if values.len() != meta.num_points() {
            return Err(Grib2Error::SizeMismatch {
                ordinal: meta.ordinal,
                expected: meta.num_points(),
                actual: values.len(),
            });
        }
        Ok(values)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.position += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Grib2Error::Truncated {
                offset: self.position,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        if self.position + n > self.file_len {
            return Err(Grib2Error::Truncated {
                offset: self.file_len,
            });
        }
        self.reader.seek_relative(n as i64)?;
        self.position += n;
        Ok(())
    }
}

impl Iterator for Grib2File {
    type Item = Result<MessageMetadata>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().transpose()
    }
}
