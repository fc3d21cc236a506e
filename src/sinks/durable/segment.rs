//! Spool segment files
//!
//! Layout:
//!
//! ```text
//! "SLSPOOL" | version (1 byte)
//! { payload_len: u32 LE | crc32(payload): u32 LE | payload } *
//! ```
//!
//! Segments are append-only. A record cut short at the end of a file is a
//! torn write; a record whose checksum or length is wrong is corruption.
//! Readers stop at either.

use flate2::Crc;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub(crate) const MAGIC: &[u8; 7] = b"SLSPOOL";
pub(crate) const VERSION: u8 = 1;
pub(crate) const HEADER_LEN: u64 = 8;
pub(crate) const RECORD_HEADER_LEN: u64 = 8;
/// Length prefixes above this are treated as corruption
pub(crate) const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

const PREFIX: &str = "segment-";
const EXTENSION: &str = ".spool";

/// `segment-00000000000000000042.spool`
pub(crate) fn file_name(seq: u64) -> String {
    format!("{}{:020}{}", PREFIX, seq, EXTENSION)
}

pub(crate) fn parse_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
    if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub(crate) fn checksum(payload: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(payload);
    crc.sum()
}

pub(crate) fn record_len(payload: &[u8]) -> u64 {
    RECORD_HEADER_LEN + payload.len() as u64
}

fn encode_record(payload: &[u8]) -> io::Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "spool record too large"))?;
    let mut record = Vec::with_capacity(payload.len() + RECORD_HEADER_LEN as usize);
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(&checksum(payload).to_le_bytes());
    record.extend_from_slice(payload);
    Ok(record)
}

/// Appends records to one segment
pub(crate) struct SegmentWriter {
    file: File,
    len: u64,
}

impl SegmentWriter {
    /// Create a new segment and write its header
    pub(crate) fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut header = [0u8; HEADER_LEN as usize];
        header[..MAGIC.len()].copy_from_slice(MAGIC);
        header[MAGIC.len()] = VERSION;
        file.write_all(&header)?;
        Ok(Self {
            file,
            len: HEADER_LEN,
        })
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Append one record, returning its encoded size
    ///
    /// A failed write is rolled back so the segment never keeps a partial
    /// record behind a later good one.
    pub(crate) fn append(&mut self, payload: &[u8]) -> io::Result<u64> {
        let record = encode_record(payload)?;
        if let Err(e) = self.file.write_all(&record) {
            let _ = self.file.set_len(self.len);
            let _ = self.file.seek(SeekFrom::Start(self.len));
            return Err(e);
        }
        self.len += record.len() as u64;
        Ok(record.len() as u64)
    }

    pub(crate) fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

/// Outcome of reading the next record
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    Record { payload: Vec<u8>, end: u64 },
    /// Clean end of the segment
    End,
    /// The file ends inside a record
    Torn,
    Corrupt(String),
}

/// Sequential record reader
pub(crate) struct SegmentReader {
    reader: BufReader<File>,
    offset: u64,
    file_len: u64,
}

impl SegmentReader {
    /// Open a segment, validate its header and position at `offset`
    ///
    /// Offsets inside the header are moved to the first record.
    pub(crate) fn open_at(path: &Path, offset: u64) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                io::Error::new(io::ErrorKind::InvalidData, "segment header truncated")
            }
            _ => e,
        })?;
        if &header[..MAGIC.len()] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad segment magic"));
        }
        if header[MAGIC.len()] != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported segment version {}", header[MAGIC.len()]),
            ));
        }

        let offset = offset.max(HEADER_LEN);
        file.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            reader: BufReader::new(file),
            offset,
            file_len,
        })
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn next_record(&mut self) -> io::Result<ReadOutcome> {
        let remaining = self.file_len.saturating_sub(self.offset);
        if remaining == 0 {
            return Ok(ReadOutcome::End);
        }
        if remaining < RECORD_HEADER_LEN {
            return Ok(ReadOutcome::Torn);
        }

        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        self.reader.read_exact(&mut header)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len > MAX_RECORD_LEN {
            return Ok(ReadOutcome::Corrupt(format!(
                "record at offset {} claims {} bytes",
                self.offset, len
            )));
        }
        if remaining < RECORD_HEADER_LEN + u64::from(len) {
            return Ok(ReadOutcome::Torn);
        }

        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload)?;
        if checksum(&payload) != expected {
            return Ok(ReadOutcome::Corrupt(format!(
                "checksum mismatch at offset {}",
                self.offset
            )));
        }

        self.offset += RECORD_HEADER_LEN + u64::from(len);
        Ok(ReadOutcome::Record {
            payload,
            end: self.offset,
        })
    }
}

/// Result of validating a whole segment
#[derive(Debug)]
pub(crate) struct ScanReport {
    /// Bytes up to the end of the last valid record
    pub valid_len: u64,
    pub records: u64,
    /// Why reading stopped early, if it did
    pub problem: Option<String>,
}

/// Walk every record of a segment
pub(crate) fn scan(path: &Path) -> io::Result<ScanReport> {
    let mut reader = SegmentReader::open_at(path, HEADER_LEN)?;
    let mut records = 0;
    loop {
        match reader.next_record()? {
            ReadOutcome::Record { .. } => records += 1,
            ReadOutcome::End => {
                return Ok(ScanReport {
                    valid_len: reader.offset(),
                    records,
                    problem: None,
                })
            }
            ReadOutcome::Torn => {
                return Ok(ScanReport {
                    valid_len: reader.offset(),
                    records,
                    problem: Some(format!("torn record at offset {}", reader.offset())),
                })
            }
            ReadOutcome::Corrupt(message) => {
                return Ok(ScanReport {
                    valid_len: reader.offset(),
                    records,
                    problem: Some(message),
                })
            }
        }
    }
}
