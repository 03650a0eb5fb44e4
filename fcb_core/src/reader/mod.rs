//! Synchronous container reader over `Read` / `Read + Seek` sources.

use std::io::{self, Read, Seek, SeekFrom};
use std::marker::PhantomData;

use fallible_streaming_iterator::FallibleStreamingIterator;
use packed_rtree::PackedRTree;
use sorted_index::MultiIndex;
use tracing::{debug, warn};

use crate::attr_query::{add_column_index, build_query, validate_attr_query, AttrQuery};
use crate::cj::{CityJson, CityJsonFeature};
use crate::const_vars::{HEADER_MAX_BUFFER_SIZE, MAGIC_BYTES_SIZE, SIZE_PREFIX_SIZE};
use crate::error::{Error, Result};
use crate::feature::decode_feature;
use crate::header::{Header, Meta};
use crate::spatial::SpatialQuery;
use crate::check_magic_bytes;

/// Reader over a seekable or sequential byte source.
///
/// `open` reads magic bytes and the header; the query methods consume the
/// reader and return a [`FeatureIter`] positioned on the matching records.
pub struct FcbReader<R> {
    reader: R,
    header: Header,
}

#[doc(hidden)]
pub mod reader_trait {
    pub struct Seekable;
    pub struct NotSeekable;
}
use reader_trait::{NotSeekable, Seekable};

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], expected: usize) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncated {
                expected,
                actual: 0,
            }
        } else {
            Error::Io(e)
        }
    })
}

impl<R: Read> FcbReader<R> {
    pub fn open(mut reader: R) -> Result<FcbReader<R>> {
        let mut magic_buf = [0u8; MAGIC_BYTES_SIZE];
        read_exact_or_truncated(&mut reader, &mut magic_buf, MAGIC_BYTES_SIZE)?;
        if !check_magic_bytes(&magic_buf) {
            return Err(Error::MissingMagicBytes);
        }

        let mut size_buf = [0u8; SIZE_PREFIX_SIZE];
        read_exact_or_truncated(&mut reader, &mut size_buf, SIZE_PREFIX_SIZE)?;
        let header_size = u32::from_le_bytes(size_buf) as usize;
        if !(8..=HEADER_MAX_BUFFER_SIZE).contains(&header_size) {
            return Err(Error::IllegalHeaderSize(header_size));
        }

        let mut header_buf = vec![0u8; header_size];
        read_exact_or_truncated(&mut reader, &mut header_buf, header_size)?;
        let header = Header::decode(&header_buf)?;
        debug!(
            features = header.features_count,
            columns = header.columns.len(),
            "opened container"
        );

        Ok(FcbReader { reader, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn meta(&self) -> Meta {
        self.header.meta()
    }

    /// The embedded CityJSON metadata document.
    pub fn cityjson(&self) -> &CityJson {
        &self.header.metadata
    }

    /// Iterate all features from a non-seekable source (pipes, stdin). The
    /// index sections are read and discarded.
    pub fn select_all_seq(mut self) -> Result<FeatureIter<R, NotSeekable>> {
        let skip = (self.header.rtree_index_size() + self.header.attr_index_size()) as u64;
        io::copy(&mut (&mut self.reader).take(skip), &mut io::sink())?;
        let count = self.header.features_count;
        Ok(FeatureIter::new(self.reader, self.header, None, count))
    }
}

impl<R: Read + Seek> FcbReader<R> {
    /// Iterate all features in file order.
    pub fn select_all(mut self) -> Result<FeatureIter<R, Seekable>> {
        let skip = (self.header.rtree_index_size() + self.header.attr_index_size()) as i64;
        self.reader.seek(SeekFrom::Current(skip))?;
        let count = self.header.features_count;
        Ok(FeatureIter::new(self.reader, self.header, None, count))
    }

    /// Legacy alias for a bbox spatial query.
    pub fn select_bbox(
        self,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) -> Result<FeatureIter<R, Seekable>> {
        self.select_spatial(SpatialQuery::bbox(min_x, min_y, max_x, max_y))
    }

    /// Spatial query via the packed R-tree. The reader must still be
    /// positioned at the index (i.e. straight after `open`).
    pub fn select_spatial(mut self, query: SpatialQuery) -> Result<FeatureIter<R, Seekable>> {
        if self.header.index_node_size == 0 || self.header.features_count == 0 {
            return Err(Error::NoIndex);
        }
        let num_items = self.header.features_count as usize;
        let node_size = self.header.index_node_size;

        let offsets: Vec<u64> = match query.search_bounds() {
            Some((min_x, min_y, max_x, max_y)) => {
                let list = PackedRTree::stream_search(
                    &mut self.reader,
                    num_items,
                    node_size,
                    min_x,
                    min_y,
                    max_x,
                    max_y,
                )?;
                debug_assert!(
                    list.windows(2).all(|w| w[0].offset < w[1].offset),
                    "breadth-first traversal yields offsets sorted by construction"
                );
                list.into_iter().map(|item| item.offset as u64).collect()
            }
            None => {
                let SpatialQuery::PointNearest { x, y } = query else {
                    unreachable!("only nearest queries have no search bounds");
                };
                PackedRTree::stream_nearest(&mut self.reader, num_items, node_size, x, y)?
                    .map(|item| item.offset as u64)
                    .into_iter()
                    .collect()
            }
        };

        // stream_search leaves the reader at the end of the index
        self.reader
            .seek(SeekFrom::Current(self.header.attr_index_size() as i64))?;
        let count = offsets.len() as u64;
        Ok(FeatureIter::new(
            self.reader,
            self.header,
            Some(offsets),
            count,
        ))
    }

    /// Attribute query via the serialized per-column indexes. Validation of
    /// column names and value types happens before any index is read.
    pub fn select_attr_query(mut self, query: &AttrQuery) -> Result<FeatureIter<R, Seekable>> {
        validate_attr_query(&self.header, query)?;

        self.reader
            .seek(SeekFrom::Current(self.header.rtree_index_size() as i64))?;

        let mut multi_index = MultiIndex::new();
        for entry in &self.header.attribute_index.clone() {
            let column = self
                .header
                .columns
                .iter()
                .find(|c| c.index == entry.index)
                .ok_or_else(|| Error::Parse(format!("no column for index entry {}", entry.index)))?;
            let queried = query.iter().any(|(name, _, _)| *name == column.name);
            if queried {
                let mut buf = vec![0u8; entry.length as usize];
                read_exact_or_truncated(&mut self.reader, &mut buf, entry.length as usize)?;
                add_column_index(&mut multi_index, column, &buf)?;
            } else {
                self.reader.seek(SeekFrom::Current(entry.length as i64))?;
            }
        }

        let offsets = multi_index.query(&build_query(query));
        let count = offsets.len() as u64;
        Ok(FeatureIter::new(
            self.reader,
            self.header,
            Some(offsets),
            count,
        ))
    }
}

/// Single-pass iterator over selected feature records.
///
/// Implements [`FallibleStreamingIterator`]; once exhausted, further calls
/// keep returning `None`. Records that fail to decode are skipped and
/// counted, they do not abort the iteration.
pub struct FeatureIter<R, S> {
    reader: R,
    header: Header,
    /// Selected feature offsets relative to the feature section start, sorted
    /// ascending. `None` iterates the whole section.
    items: Option<Vec<u64>>,
    item_pos: usize,
    /// Features left when iterating the whole section
    features_left: u64,
    /// Bytes consumed within the feature section (sequential sources)
    cur_pos: u64,
    cur_feature: Option<CityJsonFeature>,
    malformed_count: u64,
    finished: bool,
    seekable_marker: PhantomData<S>,
}

impl<R, S> std::fmt::Debug for FeatureIter<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureIter")
            .field("item_pos", &self.item_pos)
            .field("features_left", &self.features_left)
            .field("cur_pos", &self.cur_pos)
            .field("malformed_count", &self.malformed_count)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<R: Read, S> FeatureIter<R, S> {
    fn new(reader: R, header: Header, items: Option<Vec<u64>>, count: u64) -> Self {
        FeatureIter {
            reader,
            header,
            items,
            item_pos: 0,
            features_left: count,
            cur_pos: 0,
            cur_feature: None,
            malformed_count: 0,
            finished: count == 0,
            seekable_marker: PhantomData,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of selected features.
    pub fn features_count(&self) -> u64 {
        self.items
            .as_ref()
            .map(|items| items.len() as u64)
            .unwrap_or(self.header.features_count)
    }

    /// Records skipped because they failed to decode.
    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }

    pub fn cur_feature(&self) -> Option<&CityJsonFeature> {
        self.cur_feature.as_ref()
    }

    /// Read the size-prefixed record at the current position.
    fn read_record(&mut self) -> Result<Vec<u8>> {
        let mut size_buf = [0u8; SIZE_PREFIX_SIZE];
        read_exact_or_truncated(&mut self.reader, &mut size_buf, SIZE_PREFIX_SIZE)?;
        let size = u32::from_le_bytes(size_buf) as usize;
        let mut buf = vec![0u8; size];
        read_exact_or_truncated(&mut self.reader, &mut buf, size)?;
        self.cur_pos += (SIZE_PREFIX_SIZE + size) as u64;
        Ok(buf)
    }

    fn decode_or_skip(&mut self, buf: Vec<u8>) -> Option<CityJsonFeature> {
        match decode_feature(&buf, &self.header.columns) {
            Ok(feature) => Some(feature),
            Err(e) => {
                warn!("skipping malformed feature record: {e}");
                self.malformed_count += 1;
                None
            }
        }
    }
}

impl<R: Read + Seek> FeatureIter<R, Seekable> {
    fn advance_seekable(&mut self) -> Result<()> {
        loop {
            if self.finished {
                self.cur_feature = None;
                return Ok(());
            }
            let buf = match &self.items {
                Some(items) => {
                    if self.item_pos >= items.len() {
                        self.finished = true;
                        continue;
                    }
                    let offset = items[self.item_pos];
                    self.item_pos += 1;
                    let skip = offset as i64 - self.cur_pos as i64;
                    if skip != 0 {
                        self.reader.seek(SeekFrom::Current(skip))?;
                        self.cur_pos = offset;
                    }
                    self.read_record()?
                }
                None => {
                    if self.features_left == 0 {
                        self.finished = true;
                        continue;
                    }
                    self.features_left -= 1;
                    self.read_record()?
                }
            };
            if let Some(feature) = self.decode_or_skip(buf) {
                self.cur_feature = Some(feature);
                return Ok(());
            }
        }
    }
}

impl<R: Read> FeatureIter<R, NotSeekable> {
    fn advance_sequential(&mut self) -> Result<()> {
        loop {
            if self.finished {
                self.cur_feature = None;
                return Ok(());
            }
            if self.features_left == 0 {
                self.finished = true;
                continue;
            }
            self.features_left -= 1;
            let buf = self.read_record()?;
            if let Some(feature) = self.decode_or_skip(buf) {
                self.cur_feature = Some(feature);
                return Ok(());
            }
        }
    }
}

impl<R: Read + Seek> FallibleStreamingIterator for FeatureIter<R, Seekable> {
    type Item = CityJsonFeature;
    type Error = Error;

    fn advance(&mut self) -> Result<()> {
        self.advance_seekable()
    }

    fn get(&self) -> Option<&CityJsonFeature> {
        self.cur_feature.as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            let remaining = match &self.items {
                Some(items) => items.len() - self.item_pos,
                None => self.features_left as usize,
            };
            (0, Some(remaining))
        }
    }
}

impl<R: Read> FallibleStreamingIterator for FeatureIter<R, NotSeekable> {
    type Item = CityJsonFeature;
    type Error = Error;

    fn advance(&mut self) -> Result<()> {
        self.advance_sequential()
    }

    fn get(&self) -> Option<&CityJsonFeature> {
        self.cur_feature.as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            (0, Some(self.features_left as usize))
        }
    }
}
