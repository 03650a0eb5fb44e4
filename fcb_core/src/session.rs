//! Query sessions with offset/limit pagination.
//!
//! An iterator is a stateful, non-restartable cursor, so "load the next
//! batch" is cheap only when the same iterator instance is kept alive. This
//! module keys live iterators by a canonical fingerprint of (url, query) in a
//! capacity-bounded LRU owned by the caller. A page at an offset behind the
//! cursor forces a re-plan and an O(offset) skip with discarded records.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::{debug, trace};

use crate::attr_query::{attr_fingerprint, AttrQuery};
use crate::cj::CityJsonFeature;
use crate::error::Result;
use crate::http_reader::{AsyncFeatureIter, HttpFcbReader, QueryOptions, RetryHttpClient};
use crate::spatial::SpatialQuery;

/// A query as issued by a caller.
#[derive(Debug, Clone)]
pub enum FcbQuery {
    All,
    Spatial(SpatialQuery),
    Attr(AttrQuery),
}

impl FcbQuery {
    /// Deterministic cache key for (url, query); equivalent attribute
    /// queries with reordered conditions share a key.
    pub fn fingerprint(&self, url: &str) -> String {
        match self {
            FcbQuery::All => format!("{url}-all"),
            FcbQuery::Spatial(query) => format!("{url}-spatial-{}", query.fingerprint()),
            FcbQuery::Attr(query) => format!("{url}-attr-{}", attr_fingerprint(query)),
        }
    }
}

/// One page of query results.
#[derive(Debug)]
pub struct Page {
    pub features: Vec<CityJsonFeature>,
    /// Total features in the container
    pub total_count: u64,
    /// Matched features for this query, when known up front
    pub matched_count: Option<usize>,
    /// Cursor position after this page (features consumed so far)
    pub position: usize,
    /// Malformed records skipped so far in this session
    pub malformed_count: u64,
}

struct ReaderState {
    iter: AsyncFeatureIter<RetryHttpClient>,
    position: usize,
}

/// Capacity-bounded cache of live query sessions.
pub struct FcbSession {
    cache: LruCache<String, ReaderState>,
    options: QueryOptions,
}

impl FcbSession {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::with_options(capacity, QueryOptions::default())
    }

    pub fn with_options(capacity: NonZeroUsize, options: QueryOptions) -> Self {
        Self {
            cache: LruCache::new(capacity),
            options,
        }
    }

    /// Fetch `limit` features starting at `offset`.
    ///
    /// Reuses the cached iterator when `offset` continues its cursor;
    /// otherwise plans the query again and skips from the start. A failed
    /// session is dropped from the cache so the next call starts clean.
    pub async fn fetch_page(
        &mut self,
        url: &str,
        query: &FcbQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Page> {
        let key = query.fingerprint(url);

        let mut state = match self.cache.pop(&key) {
            Some(state) if state.position <= offset => {
                trace!(%key, position = state.position, "continuing cached session");
                state
            }
            cached => {
                if cached.is_some() {
                    debug!(%key, "cached cursor is past the requested offset, re-planning");
                }
                self.plan(url, query).await?
            }
        };

        // O(offset - position) skip, discarding records
        while state.position < offset {
            match state.iter.next().await? {
                Some(_) => state.position += 1,
                None => break,
            }
        }

        let mut features = Vec::with_capacity(limit);
        while features.len() < limit {
            match state.iter.next().await? {
                Some(feature) => {
                    features.push(feature);
                    state.position += 1;
                }
                None => break,
            }
        }

        let page = Page {
            features,
            total_count: state.iter.header().features_count,
            matched_count: state.iter.features_count(),
            position: state.position,
            malformed_count: state.iter.malformed_count(),
        };
        self.cache.put(key, state);
        Ok(page)
    }

    async fn plan(&self, url: &str, query: &FcbQuery) -> Result<ReaderState> {
        let reader = HttpFcbReader::open_with(url, self.options.clone()).await?;
        let iter = match query {
            FcbQuery::All => reader.select_all().await?,
            FcbQuery::Spatial(spatial) => reader.select_spatial(*spatial).await?,
            FcbQuery::Attr(attr) => reader.select_attr_query(attr).await?,
        };
        Ok(ReaderState { iter, position: 0 })
    }

    /// Drop one cached session, releasing its client and in-flight state.
    pub fn evict(&mut self, url: &str, query: &FcbQuery) {
        self.cache.pop(&query.fingerprint(url));
    }

    /// Drop all cached sessions.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorted_index::{ByteSerializableValue, Operator, OrderedFloat};

    #[test]
    fn attr_fingerprints_ignore_condition_order() {
        let a = FcbQuery::Attr(vec![
            (
                "height".to_string(),
                Operator::Gt,
                ByteSerializableValue::F64(OrderedFloat(40.0)),
            ),
            (
                "identificatie".to_string(),
                Operator::Eq,
                ByteSerializableValue::String("NL.1".to_string()),
            ),
        ]);
        let b = FcbQuery::Attr(vec![
            (
                "identificatie".to_string(),
                Operator::Eq,
                ByteSerializableValue::String("NL.1".to_string()),
            ),
            (
                "height".to_string(),
                Operator::Gt,
                ByteSerializableValue::F64(OrderedFloat(40.0)),
            ),
        ]);
        assert_eq!(
            a.fingerprint("https://example.com/delft.fcb"),
            b.fingerprint("https://example.com/delft.fcb")
        );
    }

    #[test]
    fn fingerprints_distinguish_queries_and_urls() {
        let bbox = FcbQuery::Spatial(SpatialQuery::bbox(0.0, 0.0, 1.0, 1.0));
        let nearest = FcbQuery::Spatial(SpatialQuery::point_nearest(0.5, 0.5));
        assert_ne!(bbox.fingerprint("u"), nearest.fingerprint("u"));
        assert_ne!(bbox.fingerprint("u1"), bbox.fingerprint("u2"));
        assert_ne!(FcbQuery::All.fingerprint("u"), bbox.fingerprint("u"));
    }
}
