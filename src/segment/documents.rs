//! `documentNames` and `documentLengths` files
//!
//! Both start with the entry count, followed by one record per document in
//! number order. Each record begins with the document number delta from the
//! previous record (the first is relative to zero), so segments built with
//! renumbering may contain gaps.

use std::fs;
use std::path::Path;

use super::types::DocumentNumber;
use super::vbyte::{decode_vbyte, decode_vbyte_u32, encode_vbyte};
use crate::error::{GeodexError, Result};

pub const NAMES_FILE: &str = "documentNames";
pub const LENGTHS_FILE: &str = "documentLengths";

/// Per-document values sorted by document number
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentTable<T> {
    documents: Vec<DocumentNumber>,
    values: Vec<T>,
}

impl<T> DocumentTable<T> {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            documents: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Append an entry; documents must arrive in strictly increasing order
    pub fn push(&mut self, document: DocumentNumber, value: T) -> Result<()> {
        if let Some(&last) = self.documents.last() {
            if document <= last {
                return Err(GeodexError::Corrupt(format!(
                    "document table entry {} after {}",
                    document, last
                )));
            }
        }
        self.documents.push(document);
        self.values.push(value);
        Ok(())
    }

    pub fn get(&self, document: DocumentNumber) -> Option<&T> {
        self.documents
            .binary_search(&document)
            .ok()
            .map(|i| &self.values[i])
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn first_document(&self) -> Option<DocumentNumber> {
        self.documents.first().copied()
    }

    pub fn last_document(&self) -> Option<DocumentNumber> {
        self.documents.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DocumentNumber, &T)> + '_ {
        self.documents.iter().copied().zip(self.values.iter())
    }
}

fn encode_table<'a, T: 'a, I, F>(entries: I, count: usize, mut encode: F) -> Vec<u8>
where
    I: IntoIterator<Item = (DocumentNumber, &'a T)>,
    F: FnMut(&T, &mut Vec<u8>),
    T: ?Sized,
{
    let mut out = Vec::new();
    encode_vbyte(count as u64, &mut out);
    let mut previous = 0;
    for (document, value) in entries {
        encode_vbyte(document - previous, &mut out);
        previous = document;
        encode(value, &mut out);
    }
    out
}

fn decode_table<T, F>(data: &[u8], mut decode: F) -> Result<DocumentTable<T>>
where
    F: FnMut(&[u8], &mut usize) -> Result<T>,
{
    let mut pos = 0;
    let count = decode_vbyte(data, &mut pos)? as usize;
    if count > data.len() {
        return Err(GeodexError::Corrupt(format!(
            "document table claims {} entries in {} bytes",
            count,
            data.len()
        )));
    }

    let mut table = DocumentTable::with_capacity(count);
    let mut document = 0;
    for i in 0..count {
        let delta = decode_vbyte(data, &mut pos)?;
        if i > 0 && delta == 0 {
            return Err(GeodexError::Corrupt(
                "duplicate document in table".to_string(),
            ));
        }
        document += delta;
        let value = decode(data, &mut pos)?;
        table.push(document, value)?;
    }
    if pos != data.len() {
        return Err(GeodexError::Corrupt(format!(
            "{} trailing bytes after document table",
            data.len() - pos
        )));
    }
    Ok(table)
}

/// Encode `(document, identifier)` records
pub fn encode_names<'a, I>(entries: I, count: usize) -> Vec<u8>
where
    I: IntoIterator<Item = (DocumentNumber, &'a str)>,
{
    encode_table(entries, count, |name: &str, out| {
        encode_vbyte(name.len() as u64, out);
        out.extend_from_slice(name.as_bytes());
    })
}

pub fn decode_names(data: &[u8]) -> Result<DocumentTable<String>> {
    decode_table(data, |data, pos| {
        let len = decode_vbyte(data, pos)? as usize;
        let bytes = data
            .get(*pos..*pos + len)
            .ok_or_else(|| GeodexError::Corrupt("truncated document name".to_string()))?;
        *pos += len;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| GeodexError::Corrupt(format!("document name: {}", e)))
    })
}

/// Encode `(document, length)` records
pub fn encode_lengths<'a, I>(entries: I, count: usize) -> Vec<u8>
where
    I: IntoIterator<Item = (DocumentNumber, &'a u32)>,
{
    encode_table(entries, count, |length: &u32, out| {
        encode_vbyte(*length as u64, out)
    })
}

pub fn decode_lengths(data: &[u8]) -> Result<DocumentTable<u32>> {
    decode_table(data, |data, pos| Ok(decode_vbyte_u32(data, pos)?))
}

/// Read `<dir>/documentNames`
pub fn read_names(dir: &Path) -> Result<DocumentTable<String>> {
    let data = fs::read(dir.join(NAMES_FILE))?;
    decode_names(&data).map_err(|e| GeodexError::corrupt_segment(dir, e))
}

/// Read `<dir>/documentLengths`
pub fn read_lengths(dir: &Path) -> Result<DocumentTable<u32>> {
    let data = fs::read(dir.join(LENGTHS_FILE))?;
    decode_lengths(&data).map_err(|e| GeodexError::corrupt_segment(dir, e))
}

/// Highest document number recorded in a segment's names file
pub fn highest_document(dir: &Path) -> Result<Option<DocumentNumber>> {
    Ok(read_names(dir)?.last_document())
}
