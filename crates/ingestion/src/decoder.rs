//! Message decoding seam.
//!
//! The pipeline walks messages through [`MessageSource`] so that the GRIB2
//! reader can be swapped for in-memory messages in tests. Access is
//! sequential and synchronous; callers run it on the blocking pool.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use grib2_parser::{
    level_description, parameter_short_name, Grib2Error, Grib2File, GridCoordinates,
    LevelDescriptor, MessageMetadata, ParameterId,
};
use projection::GridFingerprint;

/// What the pipeline needs to know about a message before touching its data.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    /// Position in the file, starting at 0
    pub ordinal: usize,
    pub parameter: ParameterId,
    pub level: Option<LevelDescriptor>,
    pub reference_time: DateTime<Utc>,
    pub valid_time: DateTime<Utc>,
    pub fingerprint: GridFingerprint,
    pub num_points: usize,
}

impl From<&MessageMetadata> for MessageHeader {
    fn from(meta: &MessageMetadata) -> Self {
        Self {
            ordinal: meta.ordinal,
            parameter: meta.parameter,
            level: meta.level,
            reference_time: meta.reference_time,
            valid_time: meta.valid_time,
            fingerprint: meta.fingerprint,
            num_points: meta.num_points(),
        }
    }
}

impl fmt::Display for MessageHeader {
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

/// Forward-only access to the messages of one staged file.
pub trait MessageSource: Send {
    /// Next message header; `Ok(None)` at the end of the file. An error
    /// means the file cannot be trusted past this point.
    fn next_message(&mut self) -> Result<Option<MessageHeader>, Grib2Error>;

    /// Cell coordinates of a message's grid, flattened in data order.
    fn coordinates(&mut self, header: &MessageHeader) -> Result<GridCoordinates, Grib2Error>;

    /// Decoded values of a message, NaN where the file has no data.
    fn values(&mut self, header: &MessageHeader) -> Result<Vec<f32>, Grib2Error>;
}

/// Opens staged files for decoding.
pub trait DecoderFactory: Send + Sync {
    /// `source_key` is the object key the file was staged from.
    fn open(&self, path: &Path, source_key: &str) -> Result<Box<dyn MessageSource>, Grib2Error>;
}

/// [`MessageSource`] over a local GRIB2 file.
pub struct Grib2Source {
    file: Grib2File,
    seen: Vec<MessageMetadata>,
}

impl Grib2Source {
    pub fn open(path: &Path) -> Result<Self, Grib2Error> {
        Ok(Self {
            file: Grib2File::open(path)?,
            seen: Vec::new(),
        })
    }
}

/// Metadata of a message the walker has already passed.
fn metadata<'a>(
    seen: &'a [MessageMetadata],
    header: &MessageHeader,
) -> Result<&'a MessageMetadata, Grib2Error> {
    seen.get(header.ordinal).ok_or_else(|| {
        Grib2Error::InvalidFormat(format!("message {} has not been read", header.ordinal))
    })
}

impl MessageSource for Grib2Source {
    fn next_message(&mut self) -> Result<Option<MessageHeader>, Grib2Error> {
        match self.file.next_message()? {
            Some(meta) => {
                let header = MessageHeader::from(&meta);
                self.seen.push(meta);
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    fn coordinates(&mut self, header: &MessageHeader) -> Result<GridCoordinates, Grib2Error> {
        let meta = metadata(&self.seen, header)?;
        self.file.coordinates(meta)
    }

    fn values(&mut self, header: &MessageHeader) -> Result<Vec<f32>, Grib2Error> {
        let meta = metadata(&self.seen, header)?;
        self.file.values(meta)
    }
}

/// Opens staged files with the GRIB2 reader.
#[derive(Debug, Default, Clone, Copy)]
pub struct Grib2Decoder;

impl DecoderFactory for Grib2Decoder {
    fn open(&self, path: &Path, _source_key: &str) -> Result<Box<dyn MessageSource>, Grib2Error> {
        Ok(Box::new(Grib2Source::open(path)?))
    }
}

/// A message held in memory.
#[derive(Debug, Clone)]
pub struct MemoryMessage {
    pub header: MessageHeader,
    pub coordinates: GridCoordinates,
    pub values: Vec<f32>,
}

impl MemoryMessage {
    /// Build a message whose fingerprint digests its coordinates.
    pub fn new(
        ordinal: usize,
        parameter: ParameterId,
        level: LevelDescriptor,
        reference_time: DateTime<Utc>,
        valid_time: DateTime<Utc>,
        coordinates: GridCoordinates,
        values: Vec<f32>,
    ) -> Self {
        let fingerprint = GridFingerprint::from_coordinates(
            coordinates.ni,
            coordinates.nj,
            &coordinates.lats,
            &coordinates.lons,
        );
        Self {
            header: MessageHeader {
                ordinal,
                parameter,
                level: Some(level),
                reference_time,
                valid_time,
                fingerprint,
                num_points: coordinates.len(),
            },
            coordinates,
            values,
        }
    }
}

/// [`MessageSource`] over in-memory messages, optionally failing part way.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    messages: Vec<MemoryMessage>,
    cursor: usize,
    fail_at: Option<usize>,
}

impl MemorySource {
    pub fn new(messages: Vec<MemoryMessage>) -> Self {
        Self {
            messages,
            cursor: 0,
            fail_at: None,
        }
    }

    /// Report a truncated file when message `ordinal` is reached.
    pub fn failing_at(mut self, ordinal: usize) -> Self {
        self.fail_at = Some(ordinal);
        self
    }

    fn message(&self, header: &MessageHeader) -> Result<&MemoryMessage, Grib2Error> {
        self.messages.get(header.ordinal).ok_or_else(|| {
            Grib2Error::InvalidFormat(format!("no message {}", header.ordinal))
        })
    }
}

impl MessageSource for MemorySource {
    fn next_message(&mut self) -> Result<Option<MessageHeader>, Grib2Error> {
        if self.fail_at == Some(self.cursor) {
            return Err(Grib2Error::Truncated {
                offset: self.cursor as u64,
            });
        }
        let header = self.messages.get(self.cursor).map(|m| m.header.clone());
        if header.is_some() {
            self.cursor += 1;
        }
        Ok(header)
    }

    fn coordinates(&mut self, header: &MessageHeader) -> Result<GridCoordinates, Grib2Error> {
        Ok(self.message(header)?.coordinates.clone())
    }

    fn values(&mut self, header: &MessageHeader) -> Result<Vec<f32>, Grib2Error> {
        let message = self.message(header)?;
        if message.values.len() != header.num_points {
            return Err(Grib2Error::SizeMismatch {
                ordinal: header.ordinal,
                expected: header.num_points,
                actual: message.values.len(),
            });
        }
        Ok(message.values.clone())
    }
}

/// Serves in-memory sources by object key. Keys without an entry fall back
/// to reading the staged file as GRIB2.
#[derive(Debug, Clone, Default)]
pub struct MemoryDecoder {
    files: HashMap<String, MemorySource>,
}

impl MemoryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, source_key: impl Into<String>, source: MemorySource) -> Self {
        self.files.insert(source_key.into(), source);
        self
    }
}

impl DecoderFactory for MemoryDecoder {
    fn open(&self, path: &Path, source_key: &str) -> Result<Box<dyn MessageSource>, Grib2Error> {
        match self.files.get(source_key) {
            Some(source) => Ok(Box::new(source.clone())),
            None => Grib2Decoder.open(path, source_key),
        }
    }
}
