//! Inverted list encoding with block skipping
//!
//! A list payload is:
//!
//! ```text
//! document_frequency total_count block_count
//! (max_document block_offset block_length) * block_count
//! blocks
//! ```
//!
//! Each block holds up to `BLOCK_SIZE` documents: the document count, then per
//! document the number delta (from the previous block's last document, or
//! zero), the span count and the spans. Positions are stored as deltas;
//! extents as (begin delta, length). Every integer is a vbyte.

use std::sync::Arc;

use super::statistics::ListStatistics;
use super::types::{DocumentNumber, Extent, ListKind, BLOCK_SIZE};
use super::vbyte::{decode_vbyte, decode_vbyte_u32, encode_vbyte};
use crate::error::{GeodexError, Result};

/// Skip data for one block
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipEntry {
    /// Last document in the block
    pub max_document: DocumentNumber,
    /// Offset of the block relative to the first block
    pub offset: u64,
    pub length: u64,
}

/// Builds one list payload
pub struct ListWriter {
    kind: ListKind,
    block_documents: Vec<DocumentNumber>,
    block_spans: Vec<Vec<Extent>>,
    block_data: Vec<u8>,
    skips: Vec<SkipEntry>,
    previous_block_max: DocumentNumber,
    last_document: Option<DocumentNumber>,
    statistics: ListStatistics,
}

impl ListWriter {
    pub fn new(kind: ListKind) -> Self {
        Self {
            kind,
            block_documents: Vec::with_capacity(BLOCK_SIZE),
            block_spans: Vec::with_capacity(BLOCK_SIZE),
            block_data: Vec::new(),
            skips: Vec::new(),
            previous_block_max: 0,
            last_document: None,
            statistics: ListStatistics::default(),
        }
    }

    /// Append a document with its spans.
    ///
    /// Documents must be strictly increasing and span starts non-decreasing;
    /// anything else means the inputs were not sorted and is reported as corruption.
    pub fn add_document<I>(&mut self, document: DocumentNumber, spans: I) -> Result<()>
    where
        I: IntoIterator<Item = Extent>,
    {
        if let Some(last) = self.last_document {
            if document <= last {
                return Err(GeodexError::Corrupt(format!(
                    "list documents not strictly increasing: {} after {}",
                    document, last
                )));
            }
        }

        let spans: Vec<Extent> = spans.into_iter().collect();
        if spans.is_empty() {
            return Err(GeodexError::Corrupt(format!(
                "document {} added without spans",
                document
            )));
        }
        if spans.windows(2).any(|w| w[1].begin < w[0].begin) {
            return Err(GeodexError::Corrupt(format!(
                "spans of document {} not sorted",
                document
            )));
        }
        if spans.iter().any(|s| s.end < s.begin) {
            return Err(GeodexError::Corrupt(format!(
                "inverted span in document {}",
                document
            )));
        }

        self.statistics.document_frequency += 1;
        self.statistics.total_count += spans.len() as u64;
        self.last_document = Some(document);
        self.block_documents.push(document);
        self.block_spans.push(spans);

        if self.block_documents.len() >= BLOCK_SIZE {
            self.flush_block();
        }
        Ok(())
    }

    pub fn statistics(&self) -> ListStatistics {
        self.statistics
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.document_frequency == 0
    }

    fn flush_block(&mut self) {
        if self.block_documents.is_empty() {
            return;
        }

        let start = self.block_data.len();
        let out = &mut self.block_data;
        encode_vbyte(self.block_documents.len() as u64, out);

        let mut previous = self.previous_block_max;
        for (document, spans) in self.block_documents.iter().zip(&self.block_spans) {
            encode_vbyte(document - previous, out);
            previous = *document;
            encode_vbyte(spans.len() as u64, out);

            let mut previous_begin = 0u32;
            for span in spans {
                encode_vbyte((span.begin - previous_begin) as u64, out);
                previous_begin = span.begin;
                if self.kind == ListKind::Extents {
                    encode_vbyte(span.len() as u64, out);
                }
            }
        }

        self.skips.push(SkipEntry {
            max_document: previous,
            offset: start as u64,
            length: (self.block_data.len() - start) as u64,
        });
        self.previous_block_max = previous;
        self.block_documents.clear();
        self.block_spans.clear();
    }

    /// Encode the finished list into `out`
    pub fn finish_into(mut self, out: &mut Vec<u8>) -> ListStatistics {
        self.flush_block();

        encode_vbyte(self.statistics.document_frequency, out);
        encode_vbyte(self.statistics.total_count, out);
        encode_vbyte(self.skips.len() as u64, out);
        for skip in &self.skips {
            encode_vbyte(skip.max_document, out);
            encode_vbyte(skip.offset, out);
            encode_vbyte(skip.length, out);
        }
        out.extend_from_slice(&self.block_data);
        self.statistics
    }

    /// Encode the finished list into a new buffer
    pub fn finish(self) -> (Vec<u8>, ListStatistics) {
        let mut out = Vec::new();
        let statistics = self.finish_into(&mut out);
        (out, statistics)
    }
}

/// Decoded list header
#[derive(Clone, Debug)]
struct ListHeader {
    statistics: ListStatistics,
    skips: Vec<SkipEntry>,
    /// Absolute position of the first block
    blocks_start: usize,
}

impl ListHeader {
    fn parse(data: &[u8], start: usize, end: usize) -> Result<Self> {
        let slice = &data[..end];
        let mut pos = start;
        let document_frequency = decode_vbyte(slice, &mut pos)?;
        let total_count = decode_vbyte(slice, &mut pos)?;
        let block_count = decode_vbyte(slice, &mut pos)? as usize;
        if block_count > end - start {
            return Err(GeodexError::Corrupt(format!(
                "list claims {} blocks in {} bytes",
                block_count,
                end - start
            )));
        }

        let mut skips = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            skips.push(SkipEntry {
                max_document: decode_vbyte(slice, &mut pos)?,
                offset: decode_vbyte(slice, &mut pos)?,
                length: decode_vbyte(slice, &mut pos)?,
            });
        }

        let blocks_start = pos;
        if let Some(last) = skips.last() {
            if blocks_start + (last.offset + last.length) as usize > end {
                return Err(GeodexError::Corrupt(
                    "list blocks extend past payload".to_string(),
                ));
            }
        }

        Ok(Self {
            statistics: ListStatistics::new(document_frequency, total_count),
            skips,
            blocks_start,
        })
    }
}

/// Cursor over an encoded list that decodes one block at a time
pub struct DiskListCursor {
    data: Arc<Vec<u8>>,
    kind: ListKind,
    header: ListHeader,
    block: usize,
    documents: Vec<DocumentNumber>,
    span_offsets: Vec<usize>,
    spans: Vec<Extent>,
    index: usize,
    done: bool,
}

impl DiskListCursor {
    /// Open the payload stored at `data[start..end]`
    pub fn new(data: Arc<Vec<u8>>, start: usize, end: usize, kind: ListKind) -> Result<Self> {
        if end > data.len() || start > end {
            return Err(GeodexError::Corrupt(
                "list range outside part data".to_string(),
            ));
        }
        let header = ListHeader::parse(&data, start, end)?;
        let mut cursor = Self {
            data,
            kind,
            header,
            block: 0,
            documents: Vec::new(),
            span_offsets: Vec::new(),
            spans: Vec::new(),
            index: 0,
            done: false,
        };
        cursor.reset()?;
        Ok(cursor)
    }

    /// Decode an in-memory payload
    pub fn from_bytes(bytes: Vec<u8>, kind: ListKind) -> Result<Self> {
        let end = bytes.len();
        Self::new(Arc::new(bytes), 0, end, kind)
    }

    pub fn statistics(&self) -> ListStatistics {
        self.header.statistics
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    pub fn block_count(&self) -> usize {
        self.header.skips.len()
    }

    fn load_block(&mut self, block: usize) -> Result<()> {
        self.block = block;
        self.index = 0;
        self.documents.clear();
        self.span_offsets.clear();
        self.spans.clear();

        let Some(skip) = self.header.skips.get(block).copied() else {
            self.done = true;
            return Ok(());
        };

        let start = self.header.blocks_start + skip.offset as usize;
        let end = start + skip.length as usize;
        if end > self.data.len() {
            return Err(GeodexError::Corrupt(format!(
                "block {} extends past part data",
                block
            )));
        }
        let data = &self.data[..end];
        let mut pos = start;

        let count = decode_vbyte(data, &mut pos)? as usize;
        if count == 0 || count > BLOCK_SIZE {
            return Err(GeodexError::Corrupt(format!(
                "block holds {} documents",
                count
            )));
        }

        let mut document = match block {
            0 => 0,
            b => self.header.skips[b - 1].max_document,
        };
        for _ in 0..count {
            document += decode_vbyte(data, &mut pos)?;
            let span_count = decode_vbyte_u32(data, &mut pos)? as usize;
            self.documents.push(document);
            self.span_offsets.push(self.spans.len());

            let mut begin = 0u32;
            for _ in 0..span_count {
                begin += decode_vbyte_u32(data, &mut pos)?;
                let end = match self.kind {
                    ListKind::Positions => begin + 1,
                    ListKind::Extents => begin + decode_vbyte_u32(data, &mut pos)?,
                };
                self.spans.push(Extent::new(begin, end));
            }
        }
        self.span_offsets.push(self.spans.len());

        if document != skip.max_document {
            return Err(GeodexError::Corrupt(format!(
                "block ends at document {}, skip table says {}",
                document, skip.max_document
            )));
        }
        self.done = false;
        Ok(())
    }

    /// Current document, `None` once exhausted
    pub fn document(&self) -> Option<DocumentNumber> {
        if self.done {
            None
        } else {
            self.documents.get(self.index).copied()
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Spans of the current document
    pub fn extents(&self) -> &[Extent] {
        if self.done {
            return &[];
        }
        let start = self.span_offsets[self.index];
        let end = self.span_offsets[self.index + 1];
        &self.spans[start..end]
    }

    pub fn count(&self) -> u32 {
        self.extents().len() as u32
    }

    /// Step to the next document
    pub fn advance(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.index += 1;
        if self.index >= self.documents.len() {
            self.load_block(self.block + 1)?;
        }
        Ok(())
    }

    /// Move to the first document `>= target`, skipping whole blocks
    pub fn skip_to(&mut self, target: DocumentNumber) -> Result<()> {
        match self.document() {
            None => return Ok(()),
            Some(current) if current >= target => return Ok(()),
            _ => {}
        }

        let skips = &self.header.skips;
        if skips[self.block].max_document < target {
            let next = self.block
                + skips[self.block..].partition_point(|s| s.max_document < target);
            self.load_block(next)?;
            if self.done {
                return Ok(());
            }
        }

        while let Some(document) = self.document() {
            if document >= target {
                break;
            }
            self.advance()?;
        }
        Ok(())
    }

    /// Return to the first document
    pub fn reset(&mut self) -> Result<()> {
        self.load_block(0)
    }
}

impl std::fmt::Debug for DiskListCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskListCursor")
            .field("kind", &self.kind)
            .field("statistics", &self.header.statistics)
            .field("document", &self.document())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(documents: &[(u64, &[u32])]) -> Vec<u8> {
        let mut writer = ListWriter::new(ListKind::Positions);
        for (doc, ps) in documents {
            writer
                .add_document(*doc, ps.iter().map(|&p| Extent::position(p)))
                .unwrap();
        }
        writer.finish().0
    }

    fn collect(cursor: &mut DiskListCursor) -> Vec<(u64, Vec<Extent>)> {
        let mut out = Vec::new();
        while let Some(doc) = cursor.document() {
            out.push((doc, cursor.extents().to_vec()));
            cursor.advance().unwrap();
        }
        out
    }

    #[test]
    fn test_positions_round_trip() {
        let bytes = positions(&[(0, &[1, 4]), (3, &[0]), (300, &[7, 8, 9])]);
        let mut cursor = DiskListCursor::from_bytes(bytes, ListKind::Positions).unwrap();
        assert_eq!(cursor.statistics(), ListStatistics::new(3, 6));

        let docs = collect(&mut cursor);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0], (0, vec![Extent::position(1), Extent::position(4)]));
        assert_eq!(docs[2].0, 300);
        assert_eq!(docs[2].1.len(), 3);
        assert!(cursor.is_done());
        assert_eq!(cursor.count(), 0);

        cursor.reset().unwrap();
        assert_eq!(cursor.document(), Some(0));
    }

    #[test]
    fn test_extents_round_trip() {
        let mut writer = ListWriter::new(ListKind::Extents);
        writer
            .add_document(5, vec![Extent::new(0, 3), Extent::new(2, 10)])
            .unwrap();
        let (bytes, stats) = writer.finish();
        assert_eq!(stats, ListStatistics::new(1, 2));

        let mut cursor = DiskListCursor::from_bytes(bytes, ListKind::Extents).unwrap();
        assert_eq!(
            collect(&mut cursor),
            vec![(5, vec![Extent::new(0, 3), Extent::new(2, 10)])]
        );
    }

    #[test]
    fn test_skip_across_blocks() {
        let mut writer = ListWriter::new(ListKind::Positions);
        for doc in 0..1000u64 {
            writer
                .add_document(doc * 3, [Extent::position(doc as u32 % 7)])
                .unwrap();
        }
        let (bytes, _) = writer.finish();
        let mut cursor = DiskListCursor::from_bytes(bytes, ListKind::Positions).unwrap();
        assert_eq!(cursor.block_count(), 1000usize.div_ceil(BLOCK_SIZE));

        cursor.skip_to(1501).unwrap();
        assert_eq!(cursor.document(), Some(1503));
        assert_eq!(cursor.extents(), &[Extent::position(501 % 7)]);

        // skipping backwards is a no-op
        cursor.skip_to(10).unwrap();
        assert_eq!(cursor.document(), Some(1503));

        cursor.skip_to(2997).unwrap();
        assert_eq!(cursor.document(), Some(2997));
        cursor.skip_to(2998).unwrap();
        assert!(cursor.is_done());
    }

    #[test]
    fn test_writer_rejects_unsorted_input() {
        let mut writer = ListWriter::new(ListKind::Positions);
        writer.add_document(4, [Extent::position(0)]).unwrap();
        assert!(writer.add_document(4, [Extent::position(1)]).is_err());
        assert!(writer.add_document(2, [Extent::position(1)]).is_err());
        assert!(writer
            .add_document(9, [Extent::position(3), Extent::position(1)])
            .is_err());
        assert!(writer.add_document(9, Vec::new()).is_err());
        assert_eq!(writer.statistics().document_frequency, 1);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut bytes = positions(&[(1, &[0]), (2, &[0])]);
        bytes.truncate(bytes.len() - 1);
        assert!(DiskListCursor::from_bytes(bytes, ListKind::Positions).is_err());
    }
}
