//! Keyed part files
//!
//! Every file under `parts/` maps sorted byte keys to opaque values:
//!
//! ```text
//! header   "GDXP" version:u8 codec:u8
//! values   concatenated value payloads
//! dict     FST map: key -> entry index
//! table    per entry: offset:u64le length:u64le (offset relative to file start)
//! footer   dict_offset:u64le table_offset:u64le key_count:u64le crc32:u32le "GDXP"
//! ```
//!
//! The CRC covers every byte before it and is verified when the part is opened.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crc32fast::Hasher;
use fst::{Map, MapBuilder, Streamer};

use super::types::PartCodec;
use super::vbyte::read_u64_le;
use crate::error::{GeodexError, Result};

const MAGIC: &[u8; 4] = b"GDXP";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 6;
const FOOTER_LEN: usize = 32;
const TABLE_ENTRY_LEN: usize = 16;

/// Summary of a finished part file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartSummary {
    pub keys: u64,
    pub bytes: u64,
}

/// Streaming writer; keys must be added in strictly increasing byte order
pub struct PartWriter {
    path: PathBuf,
    out: BufWriter<File>,
    hasher: Hasher,
    position: u64,
    dictionary: MapBuilder<Vec<u8>>,
    table: Vec<u8>,
    key_count: u64,
}

impl PartWriter {
    pub fn create(path: &Path, codec: PartCodec) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            hasher: Hasher::new(),
            position: 0,
            dictionary: MapBuilder::memory(),
            table: Vec::new(),
            key_count: 0,
        };
        writer.write(MAGIC)?;
        writer.write(&[VERSION, codec.id()])?;
        Ok(writer)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.hasher.update(bytes);
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Append the value for `key`
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.dictionary.insert(key, self.key_count).map_err(|e| {
            GeodexError::Corrupt(format!(
                "{}: key {:?} out of order: {}",
                self.path.display(),
                String::from_utf8_lossy(key),
                e
            ))
        })?;
        self.table.extend_from_slice(&self.position.to_le_bytes());
        self.table
            .extend_from_slice(&(value.len() as u64).to_le_bytes());
        self.key_count += 1;
        self.write(value)
    }

    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    /// Write dictionary, table and footer, then sync the file
    pub fn finish(mut self) -> Result<PartSummary> {
        let dictionary = std::mem::replace(&mut self.dictionary, MapBuilder::memory());
        let fst_bytes = dictionary.into_inner()?;
        let table = std::mem::take(&mut self.table);

        let dict_offset = self.position;
        self.write(&fst_bytes)?;
        let table_offset = self.position;
        self.write(&table)?;

        self.write(&dict_offset.to_le_bytes())?;
        self.write(&table_offset.to_le_bytes())?;
        let key_count = self.key_count;
        self.write(&key_count.to_le_bytes())?;

        let crc = self.hasher.clone().finalize();
        self.out.write_all(&crc.to_le_bytes())?;
        self.out.write_all(MAGIC)?;
        self.position += 8;

        let file = self
            .out
            .into_inner()
            .map_err(|e| GeodexError::Io(e.into_error()))?;
        file.sync_all()?;

        Ok(PartSummary {
            keys: key_count,
            bytes: self.position,
        })
    }
}

/// A part file loaded into memory
pub struct PartReader {
    path: PathBuf,
    codec: PartCodec,
    data: Arc<Vec<u8>>,
    dictionary: Map<Vec<u8>>,
    table_offset: usize,
    key_count: usize,
}

impl PartReader {
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(path, data)
    }

    pub fn from_bytes(path: &Path, data: Vec<u8>) -> Result<Self> {
        let corrupt = |reason: String| GeodexError::corrupt_segment(path, reason);

        if data.len() < HEADER_LEN + FOOTER_LEN {
            return Err(corrupt(format!("part too short ({} bytes)", data.len())));
        }
        if &data[..4] != MAGIC || &data[data.len() - 4..] != MAGIC {
            return Err(corrupt("bad part magic".to_string()));
        }
        if data[4] != VERSION {
            return Err(corrupt(format!("unsupported part version {}", data[4])));
        }
        let codec = PartCodec::from_id(data[5]).map_err(|e| corrupt(e.to_string()))?;

        let crc_pos = data.len() - 8;
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&data[crc_pos..crc_pos + 4]);
        let stored = u32::from_le_bytes(crc_bytes);
        let actual = crc32fast::hash(&data[..crc_pos]);
        if stored != actual {
            return Err(corrupt(format!(
                "checksum mismatch: stored {:08x}, computed {:08x}",
                stored, actual
            )));
        }

        let mut pos = data.len() - FOOTER_LEN;
        let dict_offset = read_u64_le(&data, &mut pos)? as usize;
        let table_offset = read_u64_le(&data, &mut pos)? as usize;
        let key_count = read_u64_le(&data, &mut pos)? as usize;

        let footer_start = data.len() - FOOTER_LEN;
        if dict_offset < HEADER_LEN
            || table_offset < dict_offset
            || table_offset + key_count * TABLE_ENTRY_LEN != footer_start
        {
            return Err(corrupt("inconsistent part footer".to_string()));
        }

        let dictionary = Map::new(data[dict_offset..table_offset].to_vec())
            .map_err(|e| corrupt(format!("dictionary: {}", e)))?;
        if dictionary.len() != key_count {
            return Err(corrupt(format!(
                "dictionary holds {} keys, table {}",
                dictionary.len(),
                key_count
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            codec,
            data: Arc::new(data),
            dictionary,
            table_offset,
            key_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn codec(&self) -> PartCodec {
        self.codec
    }

    pub fn len(&self) -> usize {
        self.key_count
    }

    pub fn is_empty(&self) -> bool {
        self.key_count == 0
    }

    /// Shared handle on the file contents
    pub fn data(&self) -> &Arc<Vec<u8>> {
        &self.data
    }

    /// Byte range of entry `index` within `data()`
    fn entry_range(&self, index: usize) -> Result<(usize, usize)> {
        let mut pos = self.table_offset + index * TABLE_ENTRY_LEN;
        let offset = read_u64_le(&self.data, &mut pos)? as usize;
        let length = read_u64_le(&self.data, &mut pos)? as usize;
        if offset < HEADER_LEN || offset + length > self.table_offset {
            return Err(GeodexError::corrupt_segment(
                &self.path,
                format!("entry {} out of bounds", index),
            ));
        }
        Ok((offset, offset + length))
    }

    /// Byte range of the value stored under `key`
    pub fn range(&self, key: &[u8]) -> Result<Option<(usize, usize)>> {
        match self.dictionary.get(key) {
            Some(index) => self.entry_range(index as usize).map(Some),
            None => Ok(None),
        }
    }

    /// Value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        Ok(self.range(key)?.map(|(start, end)| &self.data[start..end]))
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.dictionary.contains_key(key)
    }

    /// Every key in sorted order
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut keys = Vec::with_capacity(self.key_count);
        let mut stream = self.dictionary.keys();
        while let Some(key) = stream.next() {
            keys.push(key.to_vec());
        }
        keys
    }

    /// Sorted cursor over all entries, for merging
    pub fn cursor(self: &Arc<Self>) -> PartCursor {
        PartCursor {
            keys: self.keys(),
            reader: Arc::clone(self),
            index: 0,
        }
    }
}

impl std::fmt::Debug for PartReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartReader")
            .field("path", &self.path)
            .field("codec", &self.codec)
            .field("keys", &self.key_count)
            .finish()
    }
}

/// Walks a part's entries in key order
pub struct PartCursor {
    reader: Arc<PartReader>,
    keys: Vec<Vec<u8>>,
    index: usize,
}

impl PartCursor {
    pub fn key(&self) -> Option<&[u8]> {
        self.keys.get(self.index).map(|k| k.as_slice())
    }

    /// Value under the current key
    pub fn value(&self) -> Result<&[u8]> {
        let key = self
            .keys
            .get(self.index)
            .ok_or_else(|| GeodexError::Merge("cursor exhausted".to_string()))?;
        let (start, end) = self.reader.range(key)?.ok_or_else(|| {
            GeodexError::corrupt_segment(self.reader.path(), "key vanished from dictionary")
        })?;
        Ok(&self.reader.data()[start..end])
    }

    /// Byte range of the current value within the reader's data
    pub fn value_range(&self) -> Result<(usize, usize)> {
        let key = self
            .keys
            .get(self.index)
            .ok_or_else(|| GeodexError::Merge("cursor exhausted".to_string()))?;
        self.reader.range(key)?.ok_or_else(|| {
            GeodexError::corrupt_segment(self.reader.path(), "key vanished from dictionary")
        })
    }

    pub fn reader(&self) -> &Arc<PartReader> {
        &self.reader
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }

    pub fn is_done(&self) -> bool {
        self.index >= self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_part(path: &Path, entries: &[(&str, &str)]) -> PartSummary {
        let mut writer = PartWriter::create(path, PartCodec::Positions).unwrap();
        for (k, v) in entries {
            writer.add(k.as_bytes(), v.as_bytes()).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_write_and_lookup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("postings");
        let summary = write_part(&path, &[("apple", "A"), ("banana", "BB"), ("cherry", "")]);
        assert_eq!(summary.keys, 3);
        assert_eq!(
            summary.bytes,
            std::fs::metadata(&path).unwrap().len()
        );

        let reader = PartReader::open(&path).unwrap();
        assert_eq!(reader.codec(), PartCodec::Positions);
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.get(b"banana").unwrap(), Some(&b"BB"[..]));
        assert_eq!(reader.get(b"cherry").unwrap(), Some(&b""[..]));
        assert_eq!(reader.get(b"durian").unwrap(), None);
        assert_eq!(
            reader.keys(),
            vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]
        );
    }

    #[test]
    fn test_out_of_order_key_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer = PartWriter::create(&dir.path().join("p"), PartCodec::Extents).unwrap();
        writer.add(b"b", b"1").unwrap();
        assert!(writer.add(b"a", b"2").is_err());
        assert!(writer.add(b"b", b"2").is_err());
    }

    #[test]
    fn test_checksum_detects_flipped_byte() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("postings");
        write_part(&path, &[("k", "value")]);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_LEN] ^= 0xFF;
        let err = PartReader::from_bytes(&path, bytes).unwrap_err();
        assert!(matches!(err, GeodexError::CorruptSegment { .. }));

        assert!(PartReader::from_bytes(&path, b"GDXP".to_vec()).is_err());
    }

    #[test]
    fn test_cursor_walks_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("extents");
        write_part(&path, &[("a", "1"), ("b", "22")]);

        let reader = Arc::new(PartReader::open(&path).unwrap());
        let mut cursor = reader.cursor();
        let mut seen = Vec::new();
        while let Some(key) = cursor.key() {
            seen.push((key.to_vec(), cursor.value().unwrap().to_vec()));
            cursor.advance();
        }
        assert!(cursor.is_done());
        assert_eq!(
            seen,
            vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"22".to_vec())]
        );
    }

    #[test]
    fn test_empty_part() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        write_part(&path, &[]);
        let reader = PartReader::open(&path).unwrap();
        assert!(reader.is_empty());
        assert!(reader.keys().is_empty());
    }
}
