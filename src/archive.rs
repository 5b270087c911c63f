use std::collections::HashSet;

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::error::{ContextError, ErrorKind};

/// Signature of a local file header.
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
/// Signature of a central directory record.
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
/// Signature of the end of central directory record.
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

/// Fixed size in bytes of a local file header, without the name.
pub const LOCAL_FILE_HEADER_SIZE: usize = 30;
/// Fixed size in bytes of a central directory record, without the name.
pub const CENTRAL_DIRECTORY_RECORD_SIZE: usize = 46;
/// Size in bytes of the end of central directory record (no comment).
pub const END_OF_CENTRAL_DIRECTORY_SIZE: usize = 22;

/// Version 2.0 is the minimum needed to extract stored entries.
const VERSION_NEEDED: u16 = 20;
/// General purpose bit 11: the name is encoded in UTF-8.
const FLAG_UTF8_NAME: u16 = 1 << 11;
/// Compression method 0, the data is stored as-is.
const METHOD_STORED: u16 = 0;

const CRC32_TABLE: [u32; 256] = build_crc32_table();

/// Builds the lookup table of the reflected CRC-32 polynomial at compile time.
const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut index = 0;
    while index < 256 {
        let mut value = index as u32;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 1 != 0 {
                (value >> 1) ^ 0xEDB8_8320
            } else {
                value >> 1
            };
            bit += 1;
        }
        table[index] = value;
        index += 1;
    }
    table
}

/// Computes the standard CRC-32 checksum of the given bytes.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8);
    }
    !crc
}

/// A file to be stored in the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    /// Forward-slash separated path of the entry inside the archive.
    pub name: String,
    /// The raw content of the entry.
    pub data: Vec<u8>,
    /// Modification time recorded for the entry, the build time when absent.
    pub timestamp: Option<OffsetDateTime>,
}

impl ArchiveEntry {
    pub fn new<S: Into<String>>(name: S, data: Vec<u8>) -> Self {
        ArchiveEntry {
            name: name.into(),
            data,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A date and time pair in the MS-DOS encoding used by the archive headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// Encodes a timestamp, clamping it to the range representable by the format
    /// (1980-01-01 to 2107-12-31) and truncating seconds to a 2 second resolution.
    pub fn from_timestamp(timestamp: OffsetDateTime) -> Self {
        let earliest = PrimitiveDateTime::new(
            Date::from_calendar_date(1980, Month::January, 1).unwrap_or(Date::MIN),
            Time::MIDNIGHT,
        );
        let latest = PrimitiveDateTime::new(
            Date::from_calendar_date(2107, Month::December, 31).unwrap_or(Date::MAX),
            Time::from_hms(23, 59, 58).unwrap_or(Time::MIDNIGHT),
        );
        let moment = PrimitiveDateTime::new(timestamp.date(), timestamp.time())
            .clamp(earliest, latest);

        let time = (u16::from(moment.hour()) << 11)
            | (u16::from(moment.minute()) << 5)
            | (u16::from(moment.second()) / 2);
        let date = (((moment.year() - 1980) as u16) << 9)
            | (u16::from(u8::from(moment.month())) << 5)
            | u16::from(moment.day());

        DosDateTime { time, date }
    }
}

/// Incremental writer of an uncompressed archive. Local headers and data are appended to the
/// output as entries are added, while the central directory is accumulated separately and
/// emitted by `finish` together with the end of central directory record.
pub struct ArchiveWriter {
    output: Vec<u8>,
    central_directory: Vec<u8>,
    entry_count: usize,
    taken_names: HashSet<String>,
    default_timestamp: OffsetDateTime,
}

impl ArchiveWriter {
    /// Create a writer whose entries without a timestamp are recorded at the current time.
    pub fn new() -> Self {
        Self::with_default_timestamp(OffsetDateTime::now_utc())
    }

    /// Create a writer whose entries without a timestamp are recorded at the given time.
    pub fn with_default_timestamp(default_timestamp: OffsetDateTime) -> Self {
        ArchiveWriter {
            output: Vec::new(),
            central_directory: Vec::new(),
            entry_count: 0,
            taken_names: HashSet::new(),
            default_timestamp,
        }
    }

    /// Append one entry: its local header, the name bytes and the raw data.
    pub fn add_entry(&mut self, entry: &ArchiveEntry) -> Result<(), ContextError> {
        validate_name(&entry.name)?;
        if !self.taken_names.insert(entry.name.to_lowercase()) {
            return Err(ContextError::with_context(
                ErrorKind::ArchiveEncodingError,
                format!("The entry name {:?} is used more than once", entry.name),
            ));
        }
        if self.entry_count >= usize::from(u16::MAX) {
            return Err(ContextError::with_context(
                ErrorKind::ArchiveEncodingError,
                "Too many entries for an archive without the ZIP64 extension",
            ));
        }

        let name_bytes = entry.name.as_bytes();
        let name_length = to_u16(name_bytes.len(), "entry name length")?;
        let size = to_u32(entry.data.len(), "entry size")?;
        let local_header_offset = to_u32(self.output.len(), "local header offset")?;
        let checksum = crc32(&entry.data);
        let dos_date_time =
            DosDateTime::from_timestamp(entry.timestamp.unwrap_or(self.default_timestamp));

        let output = &mut self.output;
        output.reserve(LOCAL_FILE_HEADER_SIZE + name_bytes.len() + entry.data.len());
        put_u32(output, LOCAL_FILE_HEADER_SIGNATURE);
        put_u16(output, VERSION_NEEDED);
        put_u16(output, FLAG_UTF8_NAME);
        put_u16(output, METHOD_STORED);
        put_u16(output, dos_date_time.time);
        put_u16(output, dos_date_time.date);
        put_u32(output, checksum);
        put_u32(output, size); // Compressed size equals the size for stored data
        put_u32(output, size);
        put_u16(output, name_length);
        put_u16(output, 0); // Extra field length
        output.extend_from_slice(name_bytes);
        output.extend_from_slice(&entry.data);

        let record = &mut self.central_directory;
        put_u32(record, CENTRAL_DIRECTORY_SIGNATURE);
        put_u16(record, VERSION_NEEDED); // Version made by
        put_u16(record, VERSION_NEEDED);
        put_u16(record, FLAG_UTF8_NAME);
        put_u16(record, METHOD_STORED);
        put_u16(record, dos_date_time.time);
        put_u16(record, dos_date_time.date);
        put_u32(record, checksum);
        put_u32(record, size);
        put_u32(record, size);
        put_u16(record, name_length);
        put_u16(record, 0); // Extra field length
        put_u16(record, 0); // Comment length
        put_u16(record, 0); // Disk number start
        put_u16(record, 0); // Internal attributes
        put_u32(record, 0); // External attributes
        put_u32(record, local_header_offset);
        record.extend_from_slice(name_bytes);

        self.entry_count += 1;
        log::debug!(
            "Stored archive entry {:?} ({} bytes, crc {:08x}) at offset {}",
            entry.name,
            size,
            checksum,
            local_header_offset
        );

        Ok(())
    }

    /// Emit the central directory and the end of central directory record, returning the archive.
    pub fn finish(mut self) -> Result<Vec<u8>, ContextError> {
        let central_directory_offset = to_u32(self.output.len(), "central directory offset")?;
        let central_directory_size =
            to_u32(self.central_directory.len(), "central directory size")?;
        let entry_count = to_u16(self.entry_count, "entry count")?;

        self.output.append(&mut self.central_directory);

        let output = &mut self.output;
        put_u32(output, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        put_u16(output, 0); // Number of this disk
        put_u16(output, 0); // Disk where the central directory starts
        put_u16(output, entry_count); // Entries on this disk
        put_u16(output, entry_count);
        put_u32(output, central_directory_size);
        put_u32(output, central_directory_offset);
        put_u16(output, 0); // Comment length

        Ok(self.output)
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes the entries, in order, into a complete uncompressed archive.
///
/// Errors are only returned for violations of the entry contract (empty, absolute, backslashed
/// or duplicated names, sizes beyond the 32-bit fields), which the callers are expected to
/// prevent upstream.
pub fn create_archive(entries: &[ArchiveEntry]) -> Result<Vec<u8>, ContextError> {
    let mut writer = ArchiveWriter::new();
    for entry in entries {
        writer.add_entry(entry)?;
    }
    writer.finish()
}

fn validate_name(name: &str) -> Result<(), ContextError> {
    if name.is_empty() || name.starts_with('/') || name.contains('\\') {
        return Err(ContextError::with_context(
            ErrorKind::ArchiveEncodingError,
            format!("The entry name {:?} is not a relative forward-slash path", name),
        ));
    }
    Ok(())
}

fn to_u16(value: usize, what: &str) -> Result<u16, ContextError> {
    u16::try_from(value).map_err(|error| {
        ContextError::with_error(
            ErrorKind::ArchiveEncodingError,
            format!("The {what} {value} does not fit in 16 bits"),
            &error,
        )
    })
}

fn to_u32(value: usize, what: &str) -> Result<u32, ContextError> {
    u32::try_from(value).map_err(|error| {
        ContextError::with_error(
            ErrorKind::ArchiveEncodingError,
            format!("The {what} {value} does not fit in 32 bits"),
            &error,
        )
    })
}

#[inline]
fn put_u16(buffer: &mut Vec<u8>, value: u16) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

#[inline]
fn put_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_le_bytes());
}
