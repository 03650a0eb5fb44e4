//! Packed Hilbert R-tree over feature byte ranges.
//!
//! The tree is bulk-loaded bottom-up from Hilbert-sorted leaf nodes and stored
//! top-down, level by level, as a flat array of fixed-size nodes. This makes
//! the serialized index addressable by node index alone, which is what allows
//! partial traversal over `Read + Seek` streams and HTTP range requests.

mod error;

pub use error::{Error, Result};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::{max, min, Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::mem::size_of;
use std::ops::Range;
use tracing::{debug, trace};

#[cfg(feature = "http")]
use http_range_client::{AsyncBufferedHttpRangeClient, AsyncHttpRangeClient};

/// One node of the packed tree: a bounding box plus either the byte offset of
/// a feature record (leaf) or the index of the node's first child (internal).
#[derive(Clone, PartialEq, Debug)]
#[repr(C)]
pub struct NodeItem {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub offset: u64,
}

impl NodeItem {
    pub fn bounds(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> NodeItem {
        NodeItem {
            min_x,
            min_y,
            max_x,
            max_y,
            offset: 0,
        }
    }

    /// An inverted (empty) box which expands to the first box merged into it.
    pub fn create(offset: u64) -> NodeItem {
        NodeItem {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
            offset,
        }
    }

    pub fn from_reader(mut rdr: impl Read) -> Result<Self> {
        Ok(NodeItem {
            min_x: rdr.read_f64::<LittleEndian>()?,
            min_y: rdr.read_f64::<LittleEndian>()?,
            max_x: rdr.read_f64::<LittleEndian>()?,
            max_y: rdr.read_f64::<LittleEndian>()?,
            offset: rdr.read_u64::<LittleEndian>()?,
        })
    }

    fn from_bytes(raw: &[u8]) -> Result<Self> {
        Self::from_reader(&mut Cursor::new(raw))
    }

    pub fn write<W: Write>(&self, wtr: &mut W) -> std::io::Result<()> {
        wtr.write_f64::<LittleEndian>(self.min_x)?;
        wtr.write_f64::<LittleEndian>(self.min_y)?;
        wtr.write_f64::<LittleEndian>(self.max_x)?;
        wtr.write_f64::<LittleEndian>(self.max_y)?;
        wtr.write_u64::<LittleEndian>(self.offset)?;
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn expand(&mut self, r: &NodeItem) {
        if r.min_x < self.min_x {
            self.min_x = r.min_x;
        }
        if r.min_y < self.min_y {
            self.min_y = r.min_y;
        }
        if r.max_x > self.max_x {
            self.max_x = r.max_x;
        }
        if r.max_y > self.max_y {
            self.max_y = r.max_y;
        }
    }

    pub fn expand_xy(&mut self, x: f64, y: f64) {
        if x < self.min_x {
            self.min_x = x;
        }
        if y < self.min_y {
            self.min_y = y;
        }
        if x > self.max_x {
            self.max_x = x;
        }
        if y > self.max_y {
            self.max_y = y;
        }
    }

    pub fn intersects(&self, r: &NodeItem) -> bool {
        self.max_x >= r.min_x && self.max_y >= r.min_y && self.min_x <= r.max_x && self.min_y <= r.max_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.min_x <= x && x <= self.max_x && self.min_y <= y && y <= self.max_y
    }

    /// Squared euclidean distance from a point to this box (0 inside the box).
    pub fn distance_sq(&self, x: f64, y: f64) -> f64 {
        let dx = axis_dist(x, self.min_x, self.max_x);
        let dy = axis_dist(y, self.min_y, self.max_y);
        dx * dx + dy * dy
    }
}

fn axis_dist(v: f64, lo: f64, hi: f64) -> f64 {
    if v < lo {
        lo - v
    } else if v > hi {
        v - hi
    } else {
        0.0
    }
}

pub fn calc_extent(nodes: &[NodeItem]) -> NodeItem {
    nodes.iter().fold(NodeItem::create(0), |mut a, b| {
        a.expand(b);
        a
    })
}

const HILBERT_MAX: u32 = (1 << 16) - 1;

// Based on public domain code at https://github.com/rawrunprotected/hilbert_curves
fn hilbert(x: u32, y: u32) -> u32 {
    let mut a = x ^ y;
    let mut b = 0xFFFF ^ a;
    let mut c = 0xFFFF ^ (x | y);
    let mut d = x & (y ^ 0xFFFF);

    let mut aa = a | (b >> 1);
    let mut bb = (a >> 1) ^ a;
    let mut cc = ((c >> 1) ^ (b & (d >> 1))) ^ c;
    let mut dd = ((a & (c >> 1)) ^ (d >> 1)) ^ d;

    a = aa;
    b = bb;
    c = cc;
    d = dd;
    aa = (a & (a >> 2)) ^ (b & (b >> 2));
    bb = (a & (b >> 2)) ^ (b & ((a ^ b) >> 2));
    cc ^= (a & (c >> 2)) ^ (b & (d >> 2));
    dd ^= (b & (c >> 2)) ^ ((a ^ b) & (d >> 2));

    a = aa;
    b = bb;
    c = cc;
    d = dd;
    aa = (a & (a >> 4)) ^ (b & (b >> 4));
    bb = (a & (b >> 4)) ^ (b & ((a ^ b) >> 4));
    cc ^= (a & (c >> 4)) ^ (b & (d >> 4));
    dd ^= (b & (c >> 4)) ^ ((a ^ b) & (d >> 4));

    a = aa;
    b = bb;
    c = cc;
    d = dd;
    cc ^= (a & (c >> 8)) ^ (b & (d >> 8));
    dd ^= (b & (c >> 8)) ^ ((a ^ b) & (d >> 8));

    a = cc ^ (cc >> 1);
    b = dd ^ (dd >> 1);

    let mut i0 = x ^ y;
    let mut i1 = b | (0xFFFF ^ (i0 | a));

    i0 = (i0 | (i0 << 8)) & 0x00FF00FF;
    i0 = (i0 | (i0 << 4)) & 0x0F0F0F0F;
    i0 = (i0 | (i0 << 2)) & 0x33333333;
    i0 = (i0 | (i0 << 1)) & 0x55555555;

    i1 = (i1 | (i1 << 8)) & 0x00FF00FF;
    i1 = (i1 | (i1 << 4)) & 0x0F0F0F0F;
    i1 = (i1 | (i1 << 2)) & 0x33333333;
    i1 = (i1 | (i1 << 1)) & 0x55555555;

    (i1 << 1) | i0
}

fn hilbert_bbox(r: &NodeItem, extent: &NodeItem) -> u32 {
    // center of the box, scaled into the hilbert grid of the dataset extent
    let x = (HILBERT_MAX as f64 * ((r.min_x + r.max_x) / 2.0 - extent.min_x) / extent.width())
        .floor() as u32;
    let y = (HILBERT_MAX as f64 * ((r.min_y + r.max_y) / 2.0 - extent.min_y) / extent.height())
        .floor() as u32;
    hilbert(x, y)
}

pub fn hilbert_sort(items: &mut [NodeItem], extent: &NodeItem) {
    items.sort_by(|a, b| {
        let ha = hilbert_bbox(a, extent);
        let hb = hilbert_bbox(b, extent);
        hb.cmp(&ha)
    });
}

/// Bbox filter search result.
#[derive(Debug, Clone)]
pub struct SearchResultItem {
    /// Byte offset in the feature data section
    pub offset: usize,
    /// Feature number in leaf order
    pub index: usize,
}

/// Read `length` nodes starting at `node_index` from a seekable stream.
fn read_node_items<R: Read + Seek>(
    data: &mut R,
    base: u64,
    node_index: usize,
    length: usize,
) -> Result<Vec<NodeItem>> {
    data.seek(SeekFrom::Start(
        base + (node_index * size_of::<NodeItem>()) as u64,
    ))?;
    let mut node_items = Vec::with_capacity(length);
    for _ in 0..length {
        node_items.push(NodeItem::from_reader(&mut *data)?);
    }
    Ok(node_items)
}

#[cfg(feature = "http")]
async fn read_http_node_items<T: AsyncHttpRangeClient>(
    client: &mut AsyncBufferedHttpRangeClient<T>,
    base: usize,
    node_ids: &Range<usize>,
) -> Result<Vec<NodeItem>> {
    let begin = base + node_ids.start * size_of::<NodeItem>();
    let length = node_ids.len() * size_of::<NodeItem>();
    // we've already determined precisely which nodes to fetch - no need for extra
    let bytes = client.min_req_size(0).get_range(begin, length).await?;

    let mut node_items = Vec::with_capacity(node_ids.len());
    debug_assert_eq!(bytes.len(), length);
    for node_item_bytes in bytes.chunks(size_of::<NodeItem>()) {
        node_items.push(NodeItem::from_bytes(node_item_bytes)?);
    }
    Ok(node_items)
}

/// Best-first search candidate, ordered by box distance then node index so
/// equidistant leaves resolve to the smaller feature offset.
struct NearItem {
    dist: f64,
    node_index: usize,
    level: usize,
    node: NodeItem,
}

impl PartialEq for NearItem {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.node_index == other.node_index
    }
}
impl Eq for NearItem {}
impl PartialOrd for NearItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for NearItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.node_index.cmp(&other.node_index))
    }
}

/// Packed Hilbert R-tree.
pub struct PackedRTree {
    extent: NodeItem,
    node_items: Vec<NodeItem>,
    num_leaf_nodes: usize,
    branching_factor: u16,
    level_bounds: Vec<Range<usize>>,
}

impl PackedRTree {
    pub const DEFAULT_NODE_SIZE: u16 = 16;

    fn init(&mut self, node_size: u16) {
        assert!(node_size >= 2, "Node size must be at least 2");
        assert!(self.num_leaf_nodes > 0, "Cannot create empty tree");
        self.branching_factor = node_size.clamp(2, u16::MAX);
        self.level_bounds =
            PackedRTree::generate_level_bounds(self.num_leaf_nodes, self.branching_factor);
        let num_nodes = self
            .level_bounds
            .first()
            .expect("tree has at least one level when node_size >= 2 and num_items > 0")
            .end;
        self.node_items = vec![NodeItem::create(0); num_nodes];
    }

    fn generate_level_bounds(num_items: usize, node_size: u16) -> Vec<Range<usize>> {
        assert!(node_size >= 2, "Node size must be at least 2");
        assert!(num_items > 0, "Cannot create empty tree");
        assert!(
            num_items <= usize::MAX - ((num_items / node_size as usize) * 2),
            "Number of items too large"
        );

        // number of nodes per level, bottom-up
        let mut level_num_nodes: Vec<usize> = Vec::new();
        let mut n = num_items;
        let mut num_nodes = n;
        level_num_nodes.push(n);
        loop {
            n = n.div_ceil(node_size as usize);
            num_nodes += n;
            level_num_nodes.push(n);
            if n == 1 {
                break;
            }
        }
        // bounds per level in storage order (top level last in the vec start)
        let mut level_offsets: Vec<usize> = Vec::with_capacity(level_num_nodes.len());
        n = num_nodes;
        for size in &level_num_nodes {
            level_offsets.push(n - size);
            n -= size;
        }
        level_offsets
            .iter()
            .zip(&level_num_nodes)
            .map(|(&offset, &size)| offset..offset + size)
            .collect()
    }

    fn generate_nodes(&mut self) {
        for level in 0..self.level_bounds.len() - 1 {
            let children_level = self.level_bounds[level].clone();
            let parent_level = self.level_bounds[level + 1].clone();

            let mut parent_idx = parent_level.start;
            let mut child_idx = children_level.start;
            while child_idx < children_level.end {
                let mut parent_node = NodeItem::create(child_idx as u64);
                for _ in 0..self.branching_factor {
                    if child_idx >= children_level.end {
                        break;
                    }
                    parent_node.expand(&self.node_items[child_idx]);
                    child_idx += 1;
                }
                self.node_items[parent_idx] = parent_node;
                parent_idx += 1;
            }
        }
    }

    fn num_nodes(&self) -> usize {
        self.node_items.len()
    }

    fn leaf_nodes_offset(&self) -> usize {
        self.level_bounds
            .first()
            .expect("tree has at least one level")
            .start
    }

    /// Bulk-load a tree from Hilbert-sorted leaf nodes.
    pub fn build(nodes: &[NodeItem], extent: &NodeItem, node_size: u16) -> Result<PackedRTree> {
        let mut tree = PackedRTree {
            extent: extent.clone(),
            node_items: Vec::new(),
            num_leaf_nodes: nodes.len(),
            branching_factor: 0,
            level_bounds: Vec::new(),
        };
        tree.init(node_size);
        let num_nodes = tree.num_nodes();
        for (i, node) in nodes.iter().take(tree.num_leaf_nodes).cloned().enumerate() {
            tree.node_items[num_nodes - tree.num_leaf_nodes + i] = node;
        }
        tree.generate_nodes();
        Ok(tree)
    }

    /// Deserialize a full index from a stream.
    pub fn from_buf(mut data: impl Read, num_items: usize, node_size: u16) -> Result<PackedRTree> {
        let node_size = node_size.clamp(2, u16::MAX);
        let level_bounds = PackedRTree::generate_level_bounds(num_items, node_size);
        let num_nodes = level_bounds
            .first()
            .expect("tree has at least one level when node_size >= 2 and num_items > 0")
            .end;
        let mut node_items = Vec::with_capacity(num_nodes);
        let mut extent = NodeItem::create(0);
        for _ in 0..num_nodes {
            let node = NodeItem::from_reader(&mut data)?;
            extent.expand(&node);
            node_items.push(node);
        }
        Ok(PackedRTree {
            extent,
            node_items,
            num_leaf_nodes: num_items,
            branching_factor: node_size,
            level_bounds,
        })
    }

    /// In-memory bbox query: breadth-first descent pruning disjoint subtrees.
    pub fn search(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<SearchResultItem> {
        let leaf_nodes_offset = self.leaf_nodes_offset();
        let bounds = NodeItem::bounds(min_x, min_y, max_x, max_y);
        let mut results = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((0usize, self.level_bounds.len() - 1));
        while let Some((node_index, level)) = queue.pop_front() {
            let is_leaf_node = node_index >= self.num_nodes() - self.num_leaf_nodes;
            let end = min(
                node_index + self.branching_factor as usize,
                self.level_bounds[level].end,
            );
            for pos in node_index..end {
                let node_item = &self.node_items[pos];
                if !bounds.intersects(node_item) {
                    continue;
                }
                if is_leaf_node {
                    results.push(SearchResultItem {
                        offset: node_item.offset as usize,
                        index: pos - leaf_nodes_offset,
                    });
                } else {
                    queue.push_back((node_item.offset as usize, level - 1));
                }
            }
        }
        results
    }

    /// In-memory nearest neighbour: best-first descent ordered by minimum box
    /// distance. Returns the leaf whose box is closest to the query point.
    pub fn search_nearest(&self, x: f64, y: f64) -> Option<SearchResultItem> {
        let leaf_nodes_offset = self.leaf_nodes_offset();
        let top_level = self.level_bounds.len() - 1;
        let mut heap: BinaryHeap<Reverse<NearItem>> = BinaryHeap::new();
        heap.push(Reverse(NearItem {
            dist: self.node_items[0].distance_sq(x, y),
            node_index: 0,
            level: top_level,
            node: self.node_items[0].clone(),
        }));
        while let Some(Reverse(item)) = heap.pop() {
            if item.level == 0 {
                return Some(SearchResultItem {
                    offset: item.node.offset as usize,
                    index: item.node_index - leaf_nodes_offset,
                });
            }
            let children_level = item.level - 1;
            let start = item.node.offset as usize;
            let end = min(
                start + self.branching_factor as usize,
                self.level_bounds[children_level].end,
            );
            for pos in start..end {
                let node = self.node_items[pos].clone();
                heap.push(Reverse(NearItem {
                    dist: node.distance_sq(x, y),
                    node_index: pos,
                    level: children_level,
                    node,
                }));
            }
        }
        None
    }

    /// Bbox query over a seekable stream positioned at the start of the index.
    /// Reads only the node ranges on the search path and leaves the stream
    /// positioned at the end of the index.
    pub fn stream_search<R: Read + Seek>(
        data: &mut R,
        num_items: usize,
        node_size: u16,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) -> Result<Vec<SearchResultItem>> {
        let bounds = NodeItem::bounds(min_x, min_y, max_x, max_y);
        let level_bounds = PackedRTree::generate_level_bounds(num_items, node_size);
        let Range {
            start: leaf_nodes_offset,
            end: num_nodes,
        } = *level_bounds
            .first()
            .expect("tree has at least one level when node_size >= 2 and num_items > 0");

        let index_base = data.stream_position()?;

        let mut queue = VecDeque::new();
        queue.push_back((0usize, level_bounds.len() - 1));
        let mut results = Vec::new();

        while let Some((node_index, level)) = queue.pop_front() {
            trace!("next node_index: {node_index}, level: {level}");
            let is_leaf_node = node_index >= num_nodes - num_items;
            let end = min(node_index + node_size as usize, level_bounds[level].end);
            let node_items = read_node_items(data, index_base, node_index, end - node_index)?;
            for (node_pos, node_item) in node_items.iter().enumerate() {
                if !bounds.intersects(node_item) {
                    continue;
                }
                if is_leaf_node {
                    results.push(SearchResultItem {
                        offset: node_item.offset as usize,
                        index: node_index + node_pos - leaf_nodes_offset,
                    });
                } else {
                    queue.push_back((node_item.offset as usize, level - 1));
                }
            }
        }
        // leave the stream at the start of the section following the index
        data.seek(SeekFrom::Start(
            index_base + (num_nodes * size_of::<NodeItem>()) as u64,
        ))?;
        Ok(results)
    }

    /// Nearest-neighbour query over a seekable stream positioned at the start
    /// of the index. Fetches node ranges on demand, best-first.
    pub fn stream_nearest<R: Read + Seek>(
        data: &mut R,
        num_items: usize,
        node_size: u16,
        x: f64,
        y: f64,
    ) -> Result<Option<SearchResultItem>> {
        let level_bounds = PackedRTree::generate_level_bounds(num_items, node_size);
        let Range {
            start: leaf_nodes_offset,
            end: num_nodes,
        } = *level_bounds
            .first()
            .expect("tree has at least one level when node_size >= 2 and num_items > 0");
        let index_base = data.stream_position()?;
        let top_level = level_bounds.len() - 1;

        let root = read_node_items(data, index_base, 0, 1)?.remove(0);
        let mut heap: BinaryHeap<Reverse<NearItem>> = BinaryHeap::new();
        heap.push(Reverse(NearItem {
            dist: root.distance_sq(x, y),
            node_index: 0,
            level: top_level,
            node: root,
        }));
        let mut result = None;
        while let Some(Reverse(item)) = heap.pop() {
            if item.level == 0 {
                result = Some(SearchResultItem {
                    offset: item.node.offset as usize,
                    index: item.node_index - leaf_nodes_offset,
                });
                break;
            }
            let children_level = item.level - 1;
            let start = item.node.offset as usize;
            let end = min(
                start + node_size as usize,
                level_bounds[children_level].end,
            );
            let children = read_node_items(data, index_base, start, end - start)?;
            for (pos, node) in children.into_iter().enumerate() {
                heap.push(Reverse(NearItem {
                    dist: node.distance_sq(x, y),
                    node_index: start + pos,
                    level: children_level,
                    node,
                }));
            }
        }
        data.seek(SeekFrom::Start(
            index_base + (num_nodes * size_of::<NodeItem>()) as u64,
        ))?;
        Ok(result)
    }

    /// Bbox query over HTTP range requests.
    ///
    /// Node fetches for children on the same level are merged into one ranged
    /// request when the gap between them is below `combine_request_threshold`.
    /// Returned feature ranges carry an exclusive end where the following
    /// leaf's offset is known, so the caller can batch feature fetches too.
    #[cfg(feature = "http")]
    #[allow(clippy::too_many_arguments)]
    pub async fn http_stream_search<T: AsyncHttpRangeClient>(
        client: &mut AsyncBufferedHttpRangeClient<T>,
        index_begin: usize,
        feature_begin: usize,
        num_items: usize,
        branching_factor: u16,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
        combine_request_threshold: usize,
    ) -> Result<Vec<HttpSearchResultItem>> {
        if num_items == 0 {
            return Ok(vec![]);
        }
        let bounds = NodeItem::bounds(min_x, min_y, max_x, max_y);
        let level_bounds = PackedRTree::generate_level_bounds(num_items, branching_factor);
        debug!(
            "http_stream_search - index_begin: {index_begin}, feature_begin: {feature_begin}, num_items: {num_items}, branching_factor: {branching_factor}, level_bounds: {level_bounds:?}, bounds: [({min_x}, {min_y}), ({max_x}, {max_y})]"
        );

        #[derive(Debug, PartialEq, Eq)]
        struct NodeRange {
            level: usize,
            nodes: Range<usize>,
        }

        let mut queue = VecDeque::new();
        queue.push_back(NodeRange {
            nodes: 0..1,
            level: level_bounds.len() - 1,
        });
        let mut results = Vec::new();

        while let Some(node_range) = queue.pop_front() {
            debug!("next: {node_range:?}. {} items left in queue", queue.len());
            let node_items = read_http_node_items(client, index_begin, &node_range.nodes).await?;
            for (node_pos, node_item) in node_items.iter().enumerate() {
                if !bounds.intersects(node_item) {
                    continue;
                }

                if node_range.level == 0 {
                    // leaf: compute the feature range; the next leaf's offset,
                    // if fetched, bounds this feature's length
                    let start = feature_begin + node_item.offset as usize;
                    if let Some(next_node_item) = node_items.get(node_pos + 1) {
                        let end = feature_begin + next_node_item.offset as usize;
                        results.push(HttpSearchResultItem {
                            range: HttpRange::Range(start..end),
                        });
                    } else {
                        results.push(HttpSearchResultItem {
                            range: HttpRange::RangeFrom(start..),
                        });
                    }
                    continue;
                }

                let children_level = node_range.level - 1;
                let mut children_nodes =
                    node_item.offset as usize..(node_item.offset + branching_factor as u64) as usize;
                if children_level == 0 {
                    // fetch one extra leaf so the last matching feature gets
                    // a bounded range
                    children_nodes.end += 1;
                }
                children_nodes.end = min(children_nodes.end, level_bounds[children_level].end);

                let children_range = NodeRange {
                    nodes: children_nodes,
                    level: children_level,
                };

                let Some(tail) = queue.back_mut() else {
                    queue.push_back(children_range);
                    continue;
                };
                if tail.level != children_level {
                    queue.push_back(children_range);
                    continue;
                }

                let wasted_bytes = children_range
                    .nodes
                    .start
                    .saturating_sub(tail.nodes.end)
                    * size_of::<NodeItem>();
                if wasted_bytes > combine_request_threshold {
                    debug!(
                        "new request for {children_range:?}, not merging with {tail:?} (would waste {wasted_bytes} bytes)"
                    );
                    queue.push_back(children_range);
                    continue;
                }

                // merge with the tail request to save a round-trip
                trace!(
                    "merging {:?} into {tail:?} (wastes {wasted_bytes} bytes)",
                    children_range.nodes
                );
                tail.nodes.end = max(tail.nodes.end, children_range.nodes.end);
            }
        }
        Ok(results)
    }

    /// Nearest-neighbour query over HTTP range requests: best-first descent
    /// fetching only the node ranges popped from the priority queue.
    #[cfg(feature = "http")]
    pub async fn http_stream_nearest<T: AsyncHttpRangeClient>(
        client: &mut AsyncBufferedHttpRangeClient<T>,
        index_begin: usize,
        feature_begin: usize,
        num_items: usize,
        branching_factor: u16,
        x: f64,
        y: f64,
    ) -> Result<Option<HttpSearchResultItem>> {
        if num_items == 0 {
            return Ok(None);
        }
        let level_bounds = PackedRTree::generate_level_bounds(num_items, branching_factor);
        let top_level = level_bounds.len() - 1;

        let root = read_http_node_items(client, index_begin, &(0..1))
            .await?
            .remove(0);
        let mut heap: BinaryHeap<Reverse<NearItem>> = BinaryHeap::new();
        heap.push(Reverse(NearItem {
            dist: root.distance_sq(x, y),
            node_index: 0,
            level: top_level,
            node: root,
        }));
        while let Some(Reverse(item)) = heap.pop() {
            if item.level == 0 {
                let start = feature_begin + item.node.offset as usize;
                return Ok(Some(HttpSearchResultItem {
                    range: HttpRange::RangeFrom(start..),
                }));
            }
            let children_level = item.level - 1;
            let start = item.node.offset as usize;
            let end = min(
                start + branching_factor as usize,
                level_bounds[children_level].end,
            );
            let children = read_http_node_items(client, index_begin, &(start..end)).await?;
            for (pos, node) in children.into_iter().enumerate() {
                heap.push(Reverse(NearItem {
                    dist: node.distance_sq(x, y),
                    node_index: start + pos,
                    level: children_level,
                    node,
                }));
            }
        }
        Ok(None)
    }

    pub fn size(&self) -> usize {
        self.num_nodes() * size_of::<NodeItem>()
    }

    /// Serialized byte size of an index over `num_items` leaves.
    pub fn index_size(num_items: usize, node_size: u16) -> usize {
        assert!(node_size >= 2, "Node size must be at least 2");
        assert!(num_items > 0, "Cannot create empty tree");
        let node_size = node_size.clamp(2, u16::MAX) as usize;
        let mut n = num_items;
        let mut num_nodes = n;
        loop {
            n = n.div_ceil(node_size);
            num_nodes += n;
            if n == 1 {
                break;
            }
        }
        num_nodes * size_of::<NodeItem>()
    }

    /// Write all index nodes, top level first.
    pub fn stream_write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for item in &self.node_items {
            item.write(out)?;
        }
        Ok(())
    }

    pub fn extent(&self) -> NodeItem {
        self.extent.clone()
    }
}

/// Byte range within a file, suitable for an HTTP Range request.
#[derive(Debug, Clone)]
pub enum HttpRange {
    Range(Range<usize>),
    RangeFrom(std::ops::RangeFrom<usize>),
}

impl HttpRange {
    pub fn start(&self) -> usize {
        match self {
            Self::Range(range) => range.start,
            Self::RangeFrom(range) => range.start,
        }
    }

    pub fn end(&self) -> Option<usize> {
        match self {
            Self::Range(range) => Some(range.end),
            Self::RangeFrom(_) => None,
        }
    }

    pub fn length(&self) -> Option<usize> {
        match self {
            Self::Range(range) => Some(range.end - range.start),
            Self::RangeFrom(_) => None,
        }
    }
}

/// Spatial filter search result as a feature byte range.
#[derive(Debug, Clone)]
pub struct HttpSearchResultItem {
    pub range: HttpRange,
}
