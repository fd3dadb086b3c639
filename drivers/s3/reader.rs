//! 分块并发下载
//!
//! 先 HEAD 获取大小，再把对象切成固定大小的字节区间，
//! 以有界并发拉取，按区间顺序输出。

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use futures::future;
use futures::stream::{self, StreamExt};

use super::client::ObjectClient;
use crate::storage::{ByteStream, StorageResult};

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Ordered, immutable `[start, end)` boundaries of one download / 下载计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    ranges: Vec<Range<u64>>,
}

impl DownloadPlan {
    pub fn new(span: Range<u64>, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut ranges = Vec::new();
        let mut start = span.start;
        while start < span.end {
            let end = start.saturating_add(chunk_size).min(span.end);
            ranges.push(start..end);
            start = end;
        }
        Self { ranges }
    }

    pub fn ranges(&self) -> &[Range<u64>] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Chunked download reader / 分块下载读取器
pub struct ChunkedReader {
    client: Arc<dyn ObjectClient>,
    key: String,
    max_concurrency: usize,
    /// `None` means no per-fetch limit / 为空表示不限时
    timeout: Option<Duration>,
    chunk_size: u64,
}

impl ChunkedReader {
    pub fn new(client: Arc<dyn ObjectClient>, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
            max_concurrency: DEFAULT_CONCURRENCY,
            timeout: Some(DEFAULT_TIMEOUT),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    /// A zero duration disables the limit / 0 表示不限时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Probe the object and build the lazy chunk stream / 探测对象并生成惰性分块流
    ///
    /// A missing object fails with `NotFound` before any range is fetched.
    /// `range` is clamped to the object size.
    pub async fn open(self, range: Option<Range<u64>>) -> StorageResult<ByteStream> {
        let meta = self.client.head_object(&self.key).await?;
        let span = match range {
            Some(r) => r.start.min(meta.size)..r.end.min(meta.size),
            None => 0..meta.size,
        };
        let plan = DownloadPlan::new(span, self.chunk_size);
        tracing::debug!(
            "S3分块下载: key={}, size={}, chunks={}, concurrency={}",
            self.key,
            meta.size,
            plan.len(),
            self.max_concurrency
        );
        Ok(self.into_stream(plan))
    }

    fn into_stream(self, plan: DownloadPlan) -> ByteStream {
        let client = self.client;
        let key: Arc<str> = Arc::from(self.key);
        let timeout = self.timeout;

        stream::iter(plan.ranges)
            .map(move |range| fetch_range(client.clone(), key.clone(), range, timeout))
            // 有序的有界并发：最多 max_concurrency 个请求在途，输出保持区间顺序
            .buffered(self.max_concurrency)
            // 第一个错误之后结束流
            .scan(false, |failed, item| {
                if *failed {
                    return future::ready(None);
                }
                if item.is_err() {
                    *failed = true;
                }
                future::ready(Some(item))
            })
            .boxed()
    }
}

async fn fetch_range(
    client: Arc<dyn ObjectClient>,
    key: Arc<str>,
    range: Range<u64>,
    timeout: Option<Duration>,
) -> StorageResult<Bytes> {
    let expected = range.end - range.start;
    let fetch = client.get_object_range(&key, range.clone());
    let data = match timeout {
        None => fetch.await?,
        Some(limit) => match tokio::time::timeout(limit, fetch).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(anyhow!("分块下载超时: key={}, range={}..{}, timeout={:?}", key, range.start, range.end, limit).into())
            }
        },
    };
    if data.len() as u64 != expected {
        return Err(anyhow!(
            "分块长度不符: key={}, range={}..{}, expected={}, got={}",
            key,
            range.start,
            range.end,
            expected,
            data.len()
        )
        .into());
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::s3::memory::{Faults, MemoryClient};
    use crate::storage::StorageError;
    use futures::TryStreamExt;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn reader(client: &Arc<MemoryClient>, concurrency: usize, chunk: u64) -> ChunkedReader {
        ChunkedReader::new(client.clone(), "big.bin")
            .with_concurrency(concurrency)
            .with_chunk_size(chunk)
    }

    #[test]
    fn test_plan_covers_span() {
        let plan = DownloadPlan::new(0..10, 4);
        assert_eq!(plan.ranges(), &[0..4, 4..8, 8..10]);

        assert!(DownloadPlan::new(0..0, 4).is_empty());
        assert_eq!(DownloadPlan::new(3..7, 100).ranges(), &[3..7]);
    }

    #[test]
    fn test_plan_with_huge_chunk_size() {
        assert_eq!(DownloadPlan::new(5..17, u64::MAX).ranges(), &[5..17]);
        let plan = DownloadPlan::new(u64::MAX - 3..u64::MAX, u64::MAX - 1);
        assert_eq!(plan.ranges(), &[u64::MAX - 3..u64::MAX]);
    }

    #[tokio::test]
    async fn test_huge_chunk_size_with_offset_range() {
        let data = payload(40);
        let client = Arc::new(MemoryClient::new());
        client.insert("big.bin", data.clone());

        let chunks: Vec<Bytes> = reader(&client, 4, u64::MAX).open(Some(5..17)).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks, vec![Bytes::from(data[5..17].to_vec())]);
    }

    #[tokio::test]
    async fn test_zero_timeout_means_no_limit() {
        let client = Arc::new(MemoryClient::new().with_range_latency(|_| Duration::from_millis(5)));
        client.insert("big.bin", payload(40));

        let chunks: Vec<Bytes> = reader(&client, 2, 10)
            .with_timeout(Duration::ZERO)
            .open(None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), payload(40));
    }

    #[tokio::test]
    async fn test_output_order_ignores_completion_order() {
        let data = payload(100);
        // 越靠前的分块越慢
        let client = Arc::new(
            MemoryClient::new().with_range_latency(|start| Duration::from_millis(60u64.saturating_sub(start))),
        );
        client.insert("big.bin", data.clone());

        let chunks: Vec<Bytes> = reader(&client, 4, 10).open(None).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_same_bytes_for_any_concurrency() {
        let data = payload(257);
        for concurrency in [1, 2, 3, 8, 64] {
            let client = Arc::new(MemoryClient::new());
            client.insert("big.bin", data.clone());
            let chunks: Vec<Bytes> = reader(&client, concurrency, 16).open(None).await.unwrap().try_collect().await.unwrap();
            assert_eq!(chunks.concat(), data, "concurrency={}", concurrency);
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let client = Arc::new(MemoryClient::new().with_range_latency(|_| Duration::from_millis(10)));
        client.insert("big.bin", payload(200));

        let _: Vec<Bytes> = reader(&client, 3, 10).open(None).await.unwrap().try_collect().await.unwrap();
        assert_eq!(client.range_calls(), 20);
        assert!(client.max_ranges_in_flight() <= 3);
        assert!(client.max_ranges_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_missing_object_fails_before_fetch() {
        let client = Arc::new(MemoryClient::new());
        let err = reader(&client, 4, 10).open(None).await.err().unwrap();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(client.range_calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_ends_stream_after_delivered_chunks() {
        let client = Arc::new(MemoryClient::new());
        client.insert("big.bin", payload(50));
        client.set_faults(Faults { fail_range_start: Some(20), ..Default::default() });

        let items: Vec<StorageResult<Bytes>> = reader(&client, 2, 10).open(None).await.unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        assert!(matches!(items[2], Err(StorageError::Transport(_))));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let client = Arc::new(MemoryClient::new().with_range_latency(|_| Duration::from_millis(500)));
        client.insert("big.bin", payload(30));

        let mut stream = reader(&client, 2, 10)
            .with_timeout(Duration::from_millis(20))
            .open(None)
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_partial_consumption_does_not_read_ahead() {
        let client = Arc::new(MemoryClient::new());
        client.insert("big.bin", payload(100));

        let mut stream = reader(&client, 2, 10).open(None).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 10);
        drop(stream);
        assert!(client.range_calls() <= 2);
    }

    #[tokio::test]
    async fn test_empty_object_and_sub_range() {
        let client = Arc::new(MemoryClient::new());
        client.insert("empty.bin", Vec::new());
        let chunks: Vec<Bytes> = ChunkedReader::new(client.clone(), "empty.bin")
            .open(None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(chunks.is_empty());
        assert_eq!(client.range_calls(), 0);

        let data = payload(40);
        client.insert("big.bin", data.clone());
        let chunks: Vec<Bytes> = reader(&client, 4, 8).open(Some(5..17)).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), data[5..17].to_vec());

        let chunks: Vec<Bytes> = reader(&client, 4, 8).open(Some(35..1000)).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), data[35..].to_vec());
    }
}
