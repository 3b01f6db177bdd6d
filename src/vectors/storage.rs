//! Append-only binary storage for vector records.
//!
//! File format: `<name>.vec`
//!
//! Header (16 bytes):
//! - magic: [u8; 4] (`AUDX`)
//! - version: u8 (1)
//! - reserved: [u8; 3]
//! - dimensions: u32 (little-endian, 0 until the first insert)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Records (repeated):
//! - body_len: u32 (little-endian)
//! - body: key u64, content (u32 len + utf8), tags (u16 count, each u16 len + utf8),
//!   dims u32, embedding [f32; dims] (all little-endian)
//! - crc: u32 (CRC32 of body)

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::lock::FileLock;
use crate::vectors::Record;

const MAGIC: &[u8; 4] = b"AUDX";

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: magic(4) + version(1) + reserved(3) + dimensions(4) + checksum(4)
const HEADER_SIZE: usize = 16;

/// Framing around a record body: body_len(4) + crc(4)
const FRAME_OVERHEAD: usize = 8;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
}

/// An open collection file positioned for appends.
#[derive(Debug)]
pub struct CollectionFile {
    file: File,
    dimensions: usize,
    end: u64,
}

impl CollectionFile {
    /// Open the collection at `path`, creating an empty one if missing.
    ///
    /// Returns the open file together with every stored record in key order.
    pub fn open_or_create(path: &Path) -> Result<(Self, Vec<Record>), StorageError> {
        if !path.exists() {
            return Ok((Self::create(path)?, vec![]));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // another session may be in the middle of an append
        let _append = FileLock::exclusive_on(file.try_clone()?)?;

        let mut bytes = Vec::new();
        BufReader::new(&file).read_to_end(&mut bytes)?;

        let dimensions = Self::read_header(&bytes)?;
        let (records, consumed) =
            Self::read_records(&bytes[HEADER_SIZE..], HEADER_SIZE as u64, dimensions, None)?;
        let valid_len = (HEADER_SIZE + consumed) as u64;

        if valid_len < bytes.len() as u64 {
            log::warn!(
                "Truncating {} trailing bytes of an incomplete record in {}",
                bytes.len() as u64 - valid_len,
                path.display()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok((
            Self {
                file,
                dimensions,
                end: valid_len,
            },
            records,
        ))
    }

    fn create(path: &Path) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        file.write_all(&Self::encode_header(0))?;
        file.sync_all()?;

        Ok(Self {
            file,
            dimensions: 0,
            end: HEADER_SIZE as u64,
        })
    }

    /// Established dimensionality, `None` until the first record fixes it.
    pub fn dimensions(&self) -> Option<usize> {
        (self.dimensions > 0).then_some(self.dimensions)
    }

    /// Record the collection's dimensionality in the header.
    pub fn set_dimensions(&mut self, dimensions: usize) -> Result<(), StorageError> {
        let dims = u32::try_from(dimensions).map_err(|_| {
            StorageError::InvalidFormat(format!("{dimensions} dimensions do not fit the header"))
        })?;

        self.write_header(dims)?;
        self.dimensions = dimensions;
        Ok(())
    }

    fn write_header(&mut self, dimensions: u32) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&Self::encode_header(dimensions))?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Block until no other session is appending to this collection.
    ///
    /// Hold the returned lock across [`CollectionFile::catch_up`] and
    /// [`CollectionFile::append`] so keys and offsets stay unique.
    pub fn lock_for_append(&self) -> Result<FileLock, StorageError> {
        Ok(FileLock::exclusive_on(self.file.try_clone()?)?)
    }

    /// Re-read the header and decode records other sessions appended since
    /// this handle last looked. Must run under [`CollectionFile::lock_for_append`].
    pub fn catch_up(&mut self, last_key: Option<u64>) -> Result<Vec<Record>, StorageError> {
        let len = self.file.metadata()?.len();
        if len < self.end {
            return Err(StorageError::InvalidFormat(format!(
                "collection shrank from {} to {len} bytes while open",
                self.end
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut header)?;
        self.dimensions = Self::read_header(&header)?;

        if len == self.end {
            return Ok(vec![]);
        }

        let mut tail = Vec::with_capacity((len - self.end) as usize);
        self.file.seek(SeekFrom::Start(self.end))?;
        (&self.file).take(len - self.end).read_to_end(&mut tail)?;

        let (records, consumed) = Self::read_records(&tail, self.end, self.dimensions, last_key)?;
        let valid_len = self.end + consumed as u64;
        if valid_len < len {
            log::warn!(
                "Truncating {} trailing bytes left by an interrupted append",
                len - valid_len
            );
            self.file.set_len(valid_len)?;
            self.file.sync_all()?;
        }

        self.end = valid_len;
        Ok(records)
    }

    /// Append one record and sync it to disk.
    ///
    /// The first record also fixes the header's dimensionality. On failure
    /// the file is cut back to its previous length and an established
    /// dimensionality is reset, so no partial state is left behind.
    pub fn append(&mut self, record: &Record) -> Result<(), StorageError> {
        let frame = Self::encode_record(record)?;

        let establishes = self.dimensions == 0;
        if establishes {
            self.set_dimensions(record.embedding.len())?;
        }

        if let Err(err) = self.write_frame(&frame) {
            self.roll_back(establishes);
            return Err(err);
        }

        self.end += frame.len() as u64;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(self.end))?;
        self.file.write_all(frame)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn roll_back(&mut self, reset_dimensions: bool) {
        if let Err(e) = self.file.set_len(self.end) {
            log::warn!("Failed to cut back a partial record at offset {}: {e}", self.end);
        }
        if reset_dimensions {
            match self.write_header(0) {
                Ok(()) => self.dimensions = 0,
                Err(e) => log::warn!("Failed to reset collection dimensions: {e}"),
            }
        }
    }

    fn encode_header(dimensions: u32) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(MAGIC);
        header[4] = FORMAT_VERSION;
        header[8..12].copy_from_slice(&dimensions.to_le_bytes());

        let checksum = crc32fast::hash(&header[0..12]);
        header[12..16].copy_from_slice(&checksum.to_le_bytes());
        header
    }

    /// Validate the header and return the stored dimensionality.
    fn read_header(bytes: &[u8]) -> Result<usize, StorageError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StorageError::InvalidFormat(format!(
                "file is {} bytes, shorter than the {HEADER_SIZE} byte header",
                bytes.len()
            )));
        }

        if &bytes[0..4] != MAGIC {
            return Err(StorageError::InvalidFormat("bad magic bytes".to_string()));
        }

        let version = bytes[4];
        if version > FORMAT_VERSION {
            return Err(StorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored_checksum = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        if stored_checksum != crc32fast::hash(&bytes[0..12]) {
            return Err(StorageError::ChecksumMismatch);
        }

        Ok(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize)
    }

    /// Decode the complete records in `bytes`, which starts at file offset
    /// `base`. Returns them with the byte length of the valid prefix; anything
    /// past it is a final record cut short by an interrupted append.
    fn read_records(
        bytes: &[u8],
        base: u64,
        dimensions: usize,
        mut last_key: Option<u64>,
    ) -> Result<(Vec<Record>, usize), StorageError> {
        let mut records = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let remaining = &bytes[offset..];
            let corrupt = |reason: String| StorageError::Corrupt {
                offset: base + offset as u64,
                reason,
            };

            if remaining.len() < 4 {
                break;
            }

            let body_len = u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
            if remaining.len() < body_len + FRAME_OVERHEAD {
                // a cut-short append still agrees with its own length prefix;
                // a damaged length would otherwise swallow the records after it
                if let Some(actual) = Self::body_len_from_prefix(&remaining[4..]) {
                    if actual != body_len {
                        return Err(corrupt(format!(
                            "length prefix says {body_len} bytes, record holds {actual}"
                        )));
                    }
                }
                break;
            }

            let body = &remaining[4..4 + body_len];
            let crc_bytes = &remaining[4 + body_len..body_len + FRAME_OVERHEAD];
            let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

            if crc32fast::hash(body) != stored_crc {
                return Err(corrupt("checksum mismatch".to_string()));
            }

            let record = Self::decode_record(body).map_err(|e| corrupt(e))?;

            if dimensions > 0 && record.embedding.len() != dimensions {
                return Err(corrupt(format!(
                    "embedding has {} dimensions, collection has {dimensions}",
                    record.embedding.len()
                )));
            }
            if let Some(last) = last_key {
                if record.key <= last {
                    return Err(corrupt(format!("key {} follows key {last}", record.key)));
                }
            }

            last_key = Some(record.key);
            records.push(record);
            offset += body_len + FRAME_OVERHEAD;
        }

        Ok((records, offset))
    }

    /// Body length implied by the length fields of a partial body, or `None`
    /// if the bytes end before those fields do.
    fn body_len_from_prefix(partial: &[u8]) -> Option<usize> {
        let mut cursor = Cursor { bytes: partial, pos: 0 };

        cursor.take(8).ok()?;
        let content_len = u32::from_le_bytes(cursor.array().ok()?) as usize;
        cursor.take(content_len).ok()?;

        let tag_count = u16::from_le_bytes(cursor.array().ok()?);
        for _ in 0..tag_count {
            let tag_len = u16::from_le_bytes(cursor.array().ok()?) as usize;
            cursor.take(tag_len).ok()?;
        }

        let dims = u32::from_le_bytes(cursor.array().ok()?) as usize;
        cursor.pos.checked_add(dims.checked_mul(4)?)
    }

    fn encode_record(record: &Record) -> Result<Vec<u8>, StorageError> {
        let invalid = |what: &str| StorageError::InvalidFormat(format!("record {}: {what}", record.key));

        let mut body = Vec::with_capacity(32 + record.content.len() + record.embedding.len() * 4);
        body.extend_from_slice(&record.key.to_le_bytes());

        let content_len = u32::try_from(record.content.len()).map_err(|_| invalid("content too long"))?;
        body.extend_from_slice(&content_len.to_le_bytes());
        body.extend_from_slice(record.content.as_bytes());

        let tag_count = u16::try_from(record.tags.len()).map_err(|_| invalid("too many tags"))?;
        body.extend_from_slice(&tag_count.to_le_bytes());
        for tag in &record.tags {
            let tag_len = u16::try_from(tag.len()).map_err(|_| invalid("tag too long"))?;
            body.extend_from_slice(&tag_len.to_le_bytes());
            body.extend_from_slice(tag.as_bytes());
        }

        let dims = u32::try_from(record.embedding.len()).map_err(|_| invalid("embedding too long"))?;
        body.extend_from_slice(&dims.to_le_bytes());
        for &value in &record.embedding {
            body.extend_from_slice(&value.to_le_bytes());
        }

        let body_len = u32::try_from(body.len()).map_err(|_| invalid("record too large"))?;

        let mut frame = Vec::with_capacity(body.len() + FRAME_OVERHEAD);
        frame.extend_from_slice(&body_len.to_le_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(frame)
    }

    fn decode_record(body: &[u8]) -> Result<Record, String> {
        let mut cursor = Cursor { bytes: body, pos: 0 };

        let key = u64::from_le_bytes(cursor.array()?);

        let content_len = u32::from_le_bytes(cursor.array()?) as usize;
        let content = cursor.string(content_len)?;

        let tag_count = u16::from_le_bytes(cursor.array()?);
        let mut tags = BTreeSet::new();
        for _ in 0..tag_count {
            let tag_len = u16::from_le_bytes(cursor.array()?) as usize;
            tags.insert(cursor.string(tag_len)?);
        }

        let dims = u32::from_le_bytes(cursor.array()?) as usize;
        let mut embedding = Vec::with_capacity(dims);
        for _ in 0..dims {
            embedding.push(f32::from_le_bytes(cursor.array()?));
        }

        if cursor.pos != body.len() {
            return Err(format!("{} unexpected trailing bytes", body.len() - cursor.pos));
        }

        Ok(Record {
            key,
            content,
            embedding,
            tags,
        })
    }
}

/// Delete the collection file if it exists.
pub fn delete(path: &Path) -> Result<(), StorageError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| format!("record body ends early at byte {}", self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], String> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn string(&mut self, len: usize) -> Result<String, String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| format!("invalid utf8: {e}"))
    }
}
