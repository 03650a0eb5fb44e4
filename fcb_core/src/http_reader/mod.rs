//! HTTP range-request reader.
//!
//! Opens a remote container by fetching only the byte ranges a query needs:
//! a speculative prefix covering the header and the top spatial-index levels,
//! then index node ranges along the search path, then the matching feature
//! records. Nearby feature ranges are coalesced into shared requests when the
//! wasted bytes stay under a configurable threshold.

#[cfg(not(target_arch = "wasm32"))]
mod retry_client;

#[cfg(test)]
pub(crate) mod mock_client;

#[cfg(not(target_arch = "wasm32"))]
pub use retry_client::RetryHttpClient;

use std::collections::VecDeque;
use std::mem::size_of;
use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use http_range_client::{AsyncBufferedHttpRangeClient, AsyncHttpRangeClient};
use packed_rtree::{HttpRange, HttpSearchResultItem, NodeItem, PackedRTree};
use sorted_index::MultiIndex;
use tracing::{debug, trace, warn};

use crate::attr_query::{add_column_index, build_query, validate_attr_query, AttrQuery};
use crate::cj::{CityJson, CityJsonFeature};
use crate::const_vars::{HEADER_MAX_BUFFER_SIZE, MAGIC_BYTES_SIZE, SIZE_PREFIX_SIZE};
use crate::error::{Error, Result};
use crate::feature::decode_feature;
use crate::header::{Header, Meta};
use crate::spatial::SpatialQuery;
use crate::check_magic_bytes;

// The largest request we'll speculatively make. If a single huge feature
// requires more, we'll necessarily exceed this limit.
const DEFAULT_HTTP_FETCH_SIZE: usize = 1_048_576; // 1MB

/// Tuning knobs for remote reads.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Merge two feature/node fetches when the gap between them is below
    /// this many bytes.
    pub combine_request_threshold: usize,
    /// Cap on a single speculative fetch.
    pub max_fetch_size: usize,
    /// Transient-failure retries per request.
    pub retries: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            combine_request_threshold: 256 * 1024,
            max_fetch_size: DEFAULT_HTTP_FETCH_SIZE,
            retries: 3,
        }
    }
}

/// FlatCityBuf dataset HTTP reader.
pub struct HttpFcbReader<T: AsyncHttpRangeClient> {
    client: AsyncBufferedHttpRangeClient<T>,
    header: Header,
    /// magic bytes + size prefix + encoded header
    header_len: usize,
    options: QueryOptions,
}

impl<T: AsyncHttpRangeClient> std::fmt::Debug for HttpFcbReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFcbReader")
            .field("header_len", &self.header_len)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpFcbReader<RetryHttpClient> {
    pub async fn open(url: &str) -> Result<HttpFcbReader<RetryHttpClient>> {
        Self::open_with(url, QueryOptions::default()).await
    }

    pub async fn open_with(
        url: &str,
        options: QueryOptions,
    ) -> Result<HttpFcbReader<RetryHttpClient>> {
        trace!("starting: opening http reader, reading header");
        let retry_client = RetryHttpClient::new(options.retries);

        // A server advertising `Accept-Ranges: none` will never honor ranged
        // requests; fail before fetching anything.
        if let Ok(Some(accept_ranges)) =
            retry_client.head_response_header(url, "accept-ranges").await
        {
            if accept_ranges.eq_ignore_ascii_case("none") {
                return Err(Error::RangeNotSupported(url.to_string()));
            }
        }

        let full_body_flag = retry_client.full_body_flag();
        let client = AsyncBufferedHttpRangeClient::with(retry_client, url);
        match Self::_open(client, options).await {
            Err(Error::HttpClient(e)) if full_body_flag.load(std::sync::atomic::Ordering::Relaxed) => {
                warn!("server for {url} returned a full body for a ranged request: {e}");
                Err(Error::RangeNotSupported(url.to_string()))
            }
            other => other,
        }
    }
}

impl<T: AsyncHttpRangeClient> HttpFcbReader<T> {
    /// Open over a caller-provided range client (alternative transports,
    /// tests).
    pub async fn new(client: AsyncBufferedHttpRangeClient<T>) -> Result<HttpFcbReader<T>> {
        Self::_open(client, QueryOptions::default()).await
    }

    async fn _open(
        mut client: AsyncBufferedHttpRangeClient<T>,
        options: QueryOptions,
    ) -> Result<HttpFcbReader<T>> {
        // Because we use a buffered client, anything extra fetched here can
        // satisfy later reads. Immediately after the header comes the spatial
        // index, so deliberately prefetch its top levels.
        let prefetch_index_bytes: usize = {
            // The actual branching factor is in the header we don't have yet;
            // guessing wrong only means fetching slightly too much or issuing
            // one extra request later.
            let assumed_branching_factor = PackedRTree::DEFAULT_NODE_SIZE as usize;
            let prefetched_layers: u32 = 3;

            (0..prefetched_layers)
                .map(|i| assumed_branching_factor.pow(i) * size_of::<NodeItem>())
                .sum()
        };
        let assumed_header_size = 2024;
        let min_req_size = assumed_header_size + prefetch_index_bytes;
        client.set_min_req_size(min_req_size);
        debug!("fetching header. min_req_size: {min_req_size} (assumed_header_size: {assumed_header_size}, prefetched_index_bytes: {prefetch_index_bytes})");

        let mut read_bytes = 0;
        let bytes = client.get_range(read_bytes, MAGIC_BYTES_SIZE).await?;
        if !check_magic_bytes(bytes) {
            return Err(Error::MissingMagicBytes);
        }
        read_bytes += MAGIC_BYTES_SIZE;

        let bytes = client.get_range(read_bytes, SIZE_PREFIX_SIZE).await?;
        let header_size = LittleEndian::read_u32(bytes) as usize;
        if !(8..=HEADER_MAX_BUFFER_SIZE).contains(&header_size) {
            return Err(Error::IllegalHeaderSize(header_size));
        }
        read_bytes += SIZE_PREFIX_SIZE;

        let header_buf = client.get_range(read_bytes, header_size).await?;
        if header_buf.len() < header_size {
            return Err(Error::Truncated {
                expected: header_size,
                actual: header_buf.len(),
            });
        }
        let header = Header::decode(header_buf)?;
        read_bytes += header_size;

        trace!("completed: opening http reader");
        Ok(HttpFcbReader {
            client,
            header,
            header_len: read_bytes,
            options,
        })
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

    fn index_begin(&self) -> usize {
        self.header_len
    }

    fn attr_begin(&self) -> usize {
        self.header_len + self.header.rtree_index_size()
    }

    fn feature_begin(&self) -> usize {
        self.attr_begin() + self.header.attr_index_size()
    }

    /// Select all features.
    pub async fn select_all(self) -> Result<AsyncFeatureIter<T>> {
        let count = self.header.features_count;
        let pos = self.feature_begin();
        Ok(AsyncFeatureIter {
            client: self.client,
            header: self.header,
            selection: FeatureSelection::SelectAll(SelectAll {
                features_left: count,
                pos,
            }),
            count: count as usize,
            malformed_count: 0,
            max_fetch_size: self.options.max_fetch_size,
        })
    }

    /// Legacy alias for a bbox spatial query.
    pub async fn select_bbox(
        self,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) -> Result<AsyncFeatureIter<T>> {
        self.select_spatial(SpatialQuery::bbox(min_x, min_y, max_x, max_y))
            .await
    }

    /// Spatial query: traverses the packed R-tree with ranged node fetches
    /// and groups matching feature ranges into batched requests.
    pub async fn select_spatial(mut self, query: SpatialQuery) -> Result<AsyncFeatureIter<T>> {
        trace!("starting: select_spatial {query:?}, traversing index");
        if self.header.index_node_size == 0 || self.header.features_count == 0 {
            return Err(Error::NoIndex);
        }
        let num_items = self.header.features_count as usize;
        let node_size = self.header.index_node_size;
        let index_begin = self.index_begin();
        let feature_begin = self.feature_begin();
        let combine_request_threshold = self.options.combine_request_threshold;

        let selection = match query.search_bounds() {
            Some((min_x, min_y, max_x, max_y)) => {
                let list = PackedRTree::http_stream_search(
                    &mut self.client,
                    index_begin,
                    feature_begin,
                    num_items,
                    node_size,
                    min_x,
                    min_y,
                    max_x,
                    max_y,
                    combine_request_threshold,
                )
                .await?;
                debug_assert!(
                    list.windows(2)
                        .all(|w| w[0].range.start() < w[1].range.start()),
                    "breadth-first traversal yields ranges sorted by construction"
                );
                let batches = FeatureBatch::make_batches(list, combine_request_threshold);
                FeatureSelection::SelectBbox(SelectBbox {
                    feature_batches: batches,
                })
            }
            None => {
                let SpatialQuery::PointNearest { x, y } = query else {
                    unreachable!("only nearest queries have no search bounds");
                };
                let hit = PackedRTree::http_stream_nearest(
                    &mut self.client,
                    index_begin,
                    feature_begin,
                    num_items,
                    node_size,
                    x,
                    y,
                )
                .await?;
                FeatureSelection::SelectRanges(SelectRanges {
                    ranges: hit.map(|item| item.range).into_iter().collect(),
                    range_pos: 0,
                })
            }
        };

        let count = selection.len();
        trace!("completed: select_spatial, matched features: {count}");
        Ok(AsyncFeatureIter {
            client: self.client,
            header: self.header,
            selection,
            count,
            malformed_count: 0,
            max_fetch_size: self.options.max_fetch_size,
        })
    }

    /// Attribute query: fetches exactly the queried columns' index sections,
    /// evaluates conditions in memory and fetches matching features.
    /// Validation happens before any index or feature I/O.
    pub async fn select_attr_query(mut self, query: &AttrQuery) -> Result<AsyncFeatureIter<T>> {
        trace!("starting: select_attr_query via http reader");
        let columns = validate_attr_query(&self.header, query)?
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();

        let attr_begin = self.attr_begin();
        let feature_begin = self.feature_begin();

        let mut multi_index = MultiIndex::new();
        for column in &columns {
            if multi_index.contains(&column.name) {
                continue;
            }
            let (offset, length) = self
                .header
                .attr_index_offset(column.index)
                .expect("validated above");
            let bytes = self
                .client
                .min_req_size(0)
                .get_range(attr_begin + offset, length)
                .await?;
            if bytes.len() < length {
                return Err(Error::Truncated {
                    expected: length,
                    actual: bytes.len(),
                });
            }
            add_column_index(&mut multi_index, column, bytes)?;
        }

        let offsets = multi_index.query(&build_query(query));
        let count = offsets.len();
        let ranges: Vec<HttpRange> = offsets
            .into_iter()
            .map(|offset| HttpRange::RangeFrom(feature_begin + offset as usize..))
            .collect();

        trace!("completed: select_attr_query via http reader, matched features: {count}");
        Ok(AsyncFeatureIter {
            client: self.client,
            header: self.header,
            selection: FeatureSelection::SelectRanges(SelectRanges {
                ranges,
                range_pos: 0,
            }),
            count,
            malformed_count: 0,
            max_fetch_size: self.options.max_fetch_size,
        })
    }
}

/// Lazy, single-pass, non-restartable iterator over selected features.
///
/// `next` keeps returning `Ok(None)` once the sequence is exhausted. Records
/// failing to decode are skipped and counted rather than aborting iteration.
pub struct AsyncFeatureIter<T: AsyncHttpRangeClient> {
    client: AsyncBufferedHttpRangeClient<T>,
    header: Header,
    selection: FeatureSelection,
    /// Number of selected features
    count: usize,
    malformed_count: u64,
    max_fetch_size: usize,
}

impl<T: AsyncHttpRangeClient> std::fmt::Debug for AsyncFeatureIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFeatureIter")
            .field("count", &self.count)
            .field("malformed_count", &self.malformed_count)
            .field("max_fetch_size", &self.max_fetch_size)
            .finish_non_exhaustive()
    }
}

impl<T: AsyncHttpRangeClient> AsyncFeatureIter<T> {
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of selected features (unknown for some selections).
    pub fn features_count(&self) -> Option<usize> {
        (self.count > 0).then_some(self.count)
    }

    /// Records skipped because they failed to decode.
    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }

    /// Read the next feature, or `None` once the selection is exhausted.
    pub async fn next(&mut self) -> Result<Option<CityJsonFeature>> {
        loop {
            let Some(buffer) = self
                .selection
                .next_feature_buffer(&mut self.client, self.max_fetch_size)
                .await?
            else {
                if self.malformed_count > 0 {
                    debug!(
                        "iteration finished, {} malformed record(s) skipped",
                        self.malformed_count
                    );
                }
                return Ok(None);
            };
            match decode_feature(&buffer, &self.header.columns) {
                Ok(feature) => return Ok(Some(feature)),
                Err(e) => {
                    warn!("skipping malformed feature record: {e}");
                    self.malformed_count += 1;
                }
            }
        }
    }
}

enum FeatureSelection {
    SelectAll(SelectAll),
    SelectBbox(SelectBbox),
    SelectRanges(SelectRanges),
}

impl FeatureSelection {
    fn len(&self) -> usize {
        match self {
            FeatureSelection::SelectAll(select_all) => select_all.features_left as usize,
            FeatureSelection::SelectBbox(select_bbox) => select_bbox
                .feature_batches
                .iter()
                .map(|batch| batch.feature_ranges.len())
                .sum(),
            FeatureSelection::SelectRanges(select_ranges) => select_ranges.ranges.len(),
        }
    }

    async fn next_feature_buffer<T: AsyncHttpRangeClient>(
        &mut self,
        client: &mut AsyncBufferedHttpRangeClient<T>,
        max_fetch_size: usize,
    ) -> Result<Option<Bytes>> {
        match self {
            FeatureSelection::SelectAll(select_all) => {
                select_all.next_buffer(client, max_fetch_size).await
            }
            FeatureSelection::SelectBbox(select_bbox) => {
                select_bbox.next_buffer(client, max_fetch_size).await
            }
            FeatureSelection::SelectRanges(select_ranges) => select_ranges.next_buffer(client).await,
        }
    }
}

/// Read the size-prefixed record at `pos`, returning the record body.
async fn read_record<T: AsyncHttpRangeClient>(
    client: &mut AsyncBufferedHttpRangeClient<T>,
    pos: usize,
) -> Result<Bytes> {
    let size_bytes = client.get_range(pos, SIZE_PREFIX_SIZE).await?;
    let feature_size = LittleEndian::read_u32(size_bytes) as usize;
    let body = client.get_range(pos + SIZE_PREFIX_SIZE, feature_size).await?;
    if body.len() < feature_size {
        return Err(Error::Truncated {
            expected: feature_size,
            actual: body.len(),
        });
    }
    Ok(Bytes::copy_from_slice(body))
}

struct SelectAll {
    /// Features left
    features_left: u64,
    /// Absolute byte position of the next record
    pos: usize,
}

impl SelectAll {
    async fn next_buffer<T: AsyncHttpRangeClient>(
        &mut self,
        client: &mut AsyncBufferedHttpRangeClient<T>,
        max_fetch_size: usize,
    ) -> Result<Option<Bytes>> {
        if self.features_left == 0 {
            return Ok(None);
        }
        self.features_left -= 1;

        client.min_req_size(max_fetch_size);
        let size_bytes = client.get_range(self.pos, SIZE_PREFIX_SIZE).await?;
        let feature_size = LittleEndian::read_u32(size_bytes) as usize;
        let body = client
            .get_range(self.pos + SIZE_PREFIX_SIZE, feature_size)
            .await?;
        self.pos += SIZE_PREFIX_SIZE + feature_size;
        Ok(Some(Bytes::copy_from_slice(body)))
    }
}

struct SelectBbox {
    /// Batches of nearby feature ranges, in reverse order so the current
    /// batch can be popped off the end
    feature_batches: Vec<FeatureBatch>,
}

impl SelectBbox {
    async fn next_buffer<T: AsyncHttpRangeClient>(
        &mut self,
        client: &mut AsyncBufferedHttpRangeClient<T>,
        max_fetch_size: usize,
    ) -> Result<Option<Bytes>> {
        loop {
            let Some(feature_batch) = self.feature_batches.last_mut() else {
                return Ok(None);
            };
            if let Some(buffer) = feature_batch.next_buffer(client, max_fetch_size).await? {
                return Ok(Some(buffer));
            }
            // done with this batch
            self.feature_batches
                .pop()
                .expect("feature_batches was non-empty");
        }
    }
}

struct FeatureBatch {
    /// The byte range of each feature within the file
    feature_ranges: VecDeque<HttpRange>,
}

impl FeatureBatch {
    /// Group sorted feature ranges so each batch can be served by one
    /// buffered ranged request, wasting at most `combine_request_threshold`
    /// bytes per merge.
    fn make_batches(
        feature_ranges: Vec<HttpSearchResultItem>,
        combine_request_threshold: usize,
    ) -> Vec<Self> {
        let mut batched_ranges: Vec<VecDeque<HttpRange>> = vec![];

        for item in feature_ranges.into_iter() {
            let Some(latest_batch) = batched_ranges.last_mut() else {
                batched_ranges.push(VecDeque::from([item.range]));
                continue;
            };
            let previous = latest_batch.back().expect("batches are never empty");
            let HttpRange::Range(Range { end: prev_end, .. }) = previous else {
                // only the very last feature in the file has an unbounded range
                batched_ranges.push(VecDeque::from([item.range]));
                continue;
            };

            let wasted_bytes = item.range.start().saturating_sub(*prev_end);
            if wasted_bytes < combine_request_threshold {
                if wasted_bytes == 0 {
                    trace!("adjacent feature");
                } else {
                    trace!("wasting {wasted_bytes} bytes to avoid an extra request");
                }
                latest_batch.push_back(item.range);
            } else {
                trace!("new request for batch rather than wasting {wasted_bytes} bytes");
                batched_ranges.push(VecDeque::from([item.range]));
            }
        }

        let mut batches: Vec<_> = batched_ranges.into_iter().map(FeatureBatch::new).collect();
        batches.reverse();
        batches
    }

    fn new(feature_ranges: VecDeque<HttpRange>) -> Self {
        Self { feature_ranges }
    }

    /// How many bytes to fetch at once for this batch: the span from the
    /// first to the last known range end, capped so buffered memory stays
    /// bounded.
    fn request_size(&self, max_fetch_size: usize) -> usize {
        let (Some(first), Some(last)) = (self.feature_ranges.front(), self.feature_ranges.back())
        else {
            return 0;
        };
        // An unknown length only happens for the final feature in the file;
        // fetch its size prefix first, the next request gets the body.
        let last_length = last.length().unwrap_or(SIZE_PREFIX_SIZE);
        let span = (last.start() + last_length).saturating_sub(first.start());
        span.min(max_fetch_size)
    }

    async fn next_buffer<T: AsyncHttpRangeClient>(
        &mut self,
        client: &mut AsyncBufferedHttpRangeClient<T>,
        max_fetch_size: usize,
    ) -> Result<Option<Bytes>> {
        let request_size = self.request_size(max_fetch_size);
        client.set_min_req_size(request_size);
        let Some(feature_range) = self.feature_ranges.pop_front() else {
            return Ok(None);
        };
        Ok(Some(read_record(client, feature_range.start()).await?))
    }
}

struct SelectRanges {
    /// Feature ranges in ascending offset order (attribute hits, nearest)
    ranges: Vec<HttpRange>,
    range_pos: usize,
}

impl SelectRanges {
    async fn next_buffer<T: AsyncHttpRangeClient>(
        &mut self,
        client: &mut AsyncBufferedHttpRangeClient<T>,
    ) -> Result<Option<Bytes>> {
        let Some(range) = self.ranges.get(self.range_pos) else {
            return Ok(None);
        };
        let start = range.start();
        self.range_pos += 1;
        client.min_req_size(0);
        Ok(Some(read_record(client, start).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cj::{
        Boundaries, CityJson, CityJsonFeature, CityObject, Geometry, GeometryType, Metadata,
    };
    use crate::writer::attribute::AttributeSchema;
    use crate::writer::header_writer::HeaderWriterOptions;
    use crate::writer::FcbWriter;
    use serde_json::json;
    use sorted_index::{ByteSerializableValue, Operator, OrderedFloat};

    fn test_feature(id: &str, min: i64, max: i64, height: f64, ident: &str) -> CityJsonFeature {
        let mut feature = CityJsonFeature::new(id.to_string());
        feature.vertices = vec![[min, min, 0], [max, max, 0]];
        feature.city_objects.insert(
            format!("{id}-building"),
            CityObject {
                thetype: "Building".to_string(),
                attributes: Some(json!({ "height": height, "identificatie": ident })),
                geometry: Some(vec![Geometry {
                    thetype: GeometryType::MultiPoint,
                    lod: None,
                    boundaries: Boundaries::Indices(vec![0, 1]),
                    semantics: None,
                }]),
                ..Default::default()
            },
        );
        feature
    }

    /// Three features at bounding boxes [0,0,1,1], [5,5,6,6], [10,10,11,11]
    /// with heights [10, 50, 45].
    fn example_features() -> Vec<CityJsonFeature> {
        vec![
            test_feature("f1", 0, 1, 10.0, "NL.1"),
            test_feature("f2", 5, 6, 50.0, "NL.2"),
            test_feature("f3", 10, 11, 45.0, "NL.3"),
        ]
    }

    fn example_container() -> Vec<u8> {
        let mut cj = CityJson::new();
        cj.metadata = Some(Metadata {
            title: Some("example".to_string()),
            ..Default::default()
        });
        let features = example_features();
        let mut schema = AttributeSchema::new();
        for feature in &features {
            for object in feature.city_objects.values() {
                if let Some(attributes) = &object.attributes {
                    schema.add_attributes(attributes);
                }
            }
        }
        let mut writer = FcbWriter::new(
            cj,
            Some(HeaderWriterOptions {
                attribute_indices: Some(vec![
                    "height".to_string(),
                    "identificatie".to_string(),
                ]),
                ..Default::default()
            }),
            Some(schema),
        )
        .unwrap();
        for feature in &features {
            writer.add_feature(feature).unwrap();
        }
        let mut buf = Vec::new();
        writer.write(&mut buf).unwrap();
        buf
    }

    async fn drain<T: AsyncHttpRangeClient>(iter: &mut AsyncFeatureIter<T>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(feature) = iter.next().await.unwrap() {
            ids.push(feature.id);
        }
        ids
    }

    #[tokio::test]
    async fn open_reads_header_with_one_request() {
        let (reader, stats) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        assert_eq!(reader.header().features_count, 3);
        let meta = reader.meta();
        assert_eq!(meta.feature_count, 3);
        let height = meta.columns.iter().find(|c| c.name == "height").unwrap();
        assert!(height.attr_index);
        assert_eq!(
            reader.cityjson().metadata.as_ref().unwrap().title.as_deref(),
            Some("example")
        );
        // the speculative prefetch covers the whole small fixture
        assert_eq!(stats.read().unwrap().request_count, 1);
    }

    #[tokio::test]
    async fn select_bbox_yields_exactly_the_intersecting_feature() {
        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let mut iter = reader.select_bbox(-1.0, -1.0, 2.0, 2.0).await.unwrap();
        assert_eq!(drain(&mut iter).await, vec!["f1".to_string()]);
    }

    #[tokio::test]
    async fn select_bbox_soundness_and_completeness() {
        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        // covers features 2 and 3, not feature 1
        let mut iter = reader.select_bbox(4.0, 4.0, 12.0, 12.0).await.unwrap();
        let mut ids = drain(&mut iter).await;
        ids.sort();
        assert_eq!(ids, vec!["f2".to_string(), "f3".to_string()]);
    }

    #[tokio::test]
    async fn point_intersects_matches_containing_box() {
        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let mut iter = reader
            .select_spatial(SpatialQuery::point_intersects(5.5, 5.5))
            .await
            .unwrap();
        assert_eq!(drain(&mut iter).await, vec!["f2".to_string()]);

        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let mut iter = reader
            .select_spatial(SpatialQuery::point_intersects(3.0, 3.0))
            .await
            .unwrap();
        assert!(drain(&mut iter).await.is_empty());
    }

    #[tokio::test]
    async fn point_nearest_returns_the_closest_feature() {
        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let mut iter = reader
            .select_spatial(SpatialQuery::point_nearest(5.5, 5.5))
            .await
            .unwrap();
        assert_eq!(drain(&mut iter).await, vec!["f2".to_string()]);

        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let mut iter = reader
            .select_spatial(SpatialQuery::point_nearest(100.0, 100.0))
            .await
            .unwrap();
        assert_eq!(drain(&mut iter).await, vec!["f3".to_string()]);
    }

    #[tokio::test]
    async fn attr_query_gt_yields_matching_features() {
        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let query: AttrQuery = vec![(
            "height".to_string(),
            Operator::Gt,
            ByteSerializableValue::F64(OrderedFloat(40.0)),
        )];
        let mut iter = reader.select_attr_query(&query).await.unwrap();
        let mut ids = drain(&mut iter).await;
        ids.sort();
        assert_eq!(ids, vec!["f2".to_string(), "f3".to_string()]);
    }

    #[tokio::test]
    async fn attr_query_anded_conditions() {
        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let query: AttrQuery = vec![
            (
                "height".to_string(),
                Operator::Gt,
                ByteSerializableValue::F64(OrderedFloat(40.0)),
            ),
            (
                "identificatie".to_string(),
                Operator::Eq,
                ByteSerializableValue::String("NL.3".to_string()),
            ),
        ];
        let mut iter = reader.select_attr_query(&query).await.unwrap();
        assert_eq!(drain(&mut iter).await, vec!["f3".to_string()]);
    }

    #[tokio::test]
    async fn attr_query_validation_fails_before_any_io() {
        let (reader, stats) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let requests_after_open = stats.read().unwrap().request_count;

        let query: AttrQuery = vec![(
            "storeys".to_string(),
            Operator::Eq,
            ByteSerializableValue::I64(3),
        )];
        let err = reader.select_attr_query(&query).await.unwrap_err();
        assert!(matches!(err, Error::UnindexedColumn(_)));
        assert!(err.is_validation_error());
        assert_eq!(stats.read().unwrap().request_count, requests_after_open);
    }

    #[tokio::test]
    async fn attr_query_type_mismatch_fails_fast() {
        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let query: AttrQuery = vec![(
            "height".to_string(),
            Operator::Gt,
            ByteSerializableValue::String("tall".to_string()),
        )];
        let err = reader.select_attr_query(&query).await.unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn exhausted_iterator_keeps_returning_none() {
        let (reader, _) = HttpFcbReader::mock_from_buffer(example_container())
            .await
            .unwrap();
        let mut iter = reader.select_all().await.unwrap();
        let mut count = 0;
        while iter.next().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(iter.next().await.unwrap().is_none());
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_record_is_skipped_and_counted() {
        let mut data = example_container();
        // locate the first feature record and scramble its body
        let header_size = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
        let header = Header::decode(&data[12..12 + header_size]).unwrap();
        let feature_begin =
            12 + header_size + header.rtree_index_size() + header.attr_index_size();
        for byte in &mut data[feature_begin + 4..feature_begin + 10] {
            *byte = 0xFF;
        }

        let (reader, _) = HttpFcbReader::mock_from_buffer(data).await.unwrap();
        let mut iter = reader.select_all().await.unwrap();
        let ids = drain(&mut iter).await;
        assert_eq!(ids.len(), 2);
        assert_eq!(iter.malformed_count(), 1);
    }

    #[tokio::test]
    async fn missing_magic_bytes_is_a_parse_error() {
        let mut data = example_container();
        data[0] = b'x';
        let err = HttpFcbReader::mock_from_buffer(data).await.unwrap_err();
        assert!(matches!(err, Error::MissingMagicBytes));
        assert!(err.is_format_error());
    }
}
