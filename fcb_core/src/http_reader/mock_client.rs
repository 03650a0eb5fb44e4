//! In-memory range client for tests, with request statistics.
//!
//! For debugging expediency this test client prefers panics over results for
//! malformed range headers. Ranges past the end of the buffer are clamped the
//! way an HTTP server clamps a `Range` header, so speculative prefetches work
//! against small fixtures.

use std::sync::{Arc, RwLock};

use bytes::Bytes;
use http_range_client::{AsyncBufferedHttpRangeClient, AsyncHttpRangeClient, HttpError};

use crate::error::Result;
use crate::http_reader::{HttpFcbReader, QueryOptions};

#[derive(Debug)]
pub(crate) struct MockHttpRangeClient {
    data: Arc<Vec<u8>>,
    stats: Arc<RwLock<RequestStats>>,
}

#[derive(Debug, Default)]
pub(crate) struct RequestStats {
    pub request_count: u64,
    pub bytes_requested: u64,
}

impl HttpFcbReader<MockHttpRangeClient> {
    /// Open a reader over an in-memory container, as if served over HTTP.
    pub(crate) async fn mock_from_buffer(
        data: Vec<u8>,
    ) -> Result<(
        HttpFcbReader<MockHttpRangeClient>,
        Arc<RwLock<RequestStats>>,
    )> {
        let stats = Arc::new(RwLock::new(RequestStats::default()));
        let http_client = MockHttpRangeClient {
            data: Arc::new(data),
            stats: stats.clone(),
        };
        let client = AsyncBufferedHttpRangeClient::with(http_client, "memory://fixture");
        Ok((Self::_open(client, QueryOptions::default()).await?, stats))
    }
}

#[async_trait::async_trait]
impl AsyncHttpRangeClient for MockHttpRangeClient {
    async fn get_range(&self, _url: &str, range: &str) -> http_range_client::Result<Bytes> {
        // range headers are inclusive: "bytes=start-end"
        let bytes = range.strip_prefix("bytes=").expect("malformed range header");
        let parts: Vec<&str> = bytes.split('-').collect();
        assert_eq!(parts.len(), 2, "malformed range header");
        let start: usize = parts[0].parse().expect("valid start range");
        let end: usize = parts[1].parse().expect("valid end range");

        if start >= self.data.len() {
            return Err(HttpError::HttpStatus(416));
        }
        let end = end.min(self.data.len() - 1);

        let mut stats = self
            .stats
            .write()
            .expect("test code does not handle actual concurrency");
        stats.request_count += 1;
        stats.bytes_requested += (end + 1 - start) as u64;

        Ok(Bytes::copy_from_slice(&self.data[start..=end]))
    }

    async fn head_response_header(
        &self,
        _url: &str,
        _header: &str,
    ) -> http_range_client::Result<Option<String>> {
        Ok(None)
    }
}
