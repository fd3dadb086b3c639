//! 内存对象存储
//!
//! An `ObjectClient` that keeps objects in a `BTreeMap`. Used for tests and
//! local development; it enforces the same multipart contract as S3 (parts
//! ascending, etags must match) and can inject faults on demand.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::client::{CompletedPart, ListPage, ObjectClient, ObjectInfo, ObjectMeta};
use crate::storage::{StorageError, StorageResult};

const DEFAULT_PAGE_SIZE: usize = 1000;

type LatencyFn = Arc<dyn Fn(u64) -> Duration + Send + Sync>;

struct StoredObject {
    data: Bytes,
    modified: DateTime<Utc>,
}

struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

/// 故障注入
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub fail_initiate: bool,
    /// Fail the upload of this part number / 上传该分片时失败
    pub fail_part: Option<u32>,
    pub fail_complete: bool,
    /// Fail the range fetch starting at this offset / 从该偏移开始的分块下载失败
    pub fail_range_start: Option<u64>,
    /// Fail the n-th delete call (1-based) / 第n次删除调用失败
    pub fail_delete_call: Option<usize>,
    /// Fail every delete of this key / 删除该键时失败
    pub fail_delete_key: Option<String>,
}

#[derive(Default)]
struct CallStats {
    total: AtomicUsize,
    deletes: AtomicUsize,
    ranges: AtomicUsize,
    ranges_in_flight: AtomicUsize,
    max_ranges_in_flight: AtomicUsize,
    aborts: AtomicUsize,
}

/// Decrements the in-flight gauge even when the fetch future is dropped / 取消时也会递减
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 内存客户端
pub struct MemoryClient {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    completed_orders: Mutex<Vec<Vec<u32>>>,
    faults: Mutex<Faults>,
    stats: CallStats,
    page_size: usize,
    range_latency: Option<LatencyFn>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            completed_orders: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            stats: CallStats::default(),
            page_size: DEFAULT_PAGE_SIZE,
            range_latency: None,
        }
    }

    /// Max keys per listing page / 每页最多返回的键数
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay applied to each range fetch, keyed by its start offset / 分块下载延迟
    pub fn with_range_latency<F>(mut self, latency: F) -> Self
    where
        F: Fn(u64) -> Duration + Send + Sync + 'static,
    {
        self.range_latency = Some(Arc::new(latency));
        self
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock() = faults;
    }

    /// Store an object directly, bypassing call counters / 直接写入对象
    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.insert_at(key, data, Utc::now());
    }

    pub fn insert_at(&self, key: &str, data: impl Into<Bytes>, modified: DateTime<Utc>) {
        self.objects.lock().insert(
            key.to_string(),
            StoredObject { data: data.into(), modified },
        );
    }

    pub fn contents(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().get(key).map(|o| o.data.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Total client calls so far / 客户端调用总次数
    pub fn calls(&self) -> usize {
        self.stats.total.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.stats.deletes.load(Ordering::SeqCst)
    }

    pub fn range_calls(&self) -> usize {
        self.stats.ranges.load(Ordering::SeqCst)
    }

    pub fn max_ranges_in_flight(&self) -> usize {
        self.stats.max_ranges_in_flight.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> usize {
        self.stats.aborts.load(Ordering::SeqCst)
    }

    /// Part numbers received by each successful complete call / 每次完成调用收到的分片顺序
    pub fn completed_part_orders(&self) -> Vec<Vec<u32>> {
        self.completed_orders.lock().clone()
    }

    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    fn count(&self) {
        self.stats.total.fetch_add(1, Ordering::SeqCst);
    }

    fn etag(data: &[u8]) -> String {
        format!("\"{:x}\"", md5::compute(data))
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn put_object(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.count();
        self.insert(key, Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        self.count();
        self.contents(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_object_range(&self, key: &str, range: Range<u64>) -> StorageResult<Bytes> {
        self.count();
        self.stats.ranges.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.ranges_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_ranges_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.stats.ranges_in_flight);

        if let Some(latency) = &self.range_latency {
            tokio::time::sleep(latency(range.start)).await;
        }
        if self.faults.lock().fail_range_start == Some(range.start) {
            return Err(anyhow!("injected range failure at {}", range.start).into());
        }

        let data = self
            .contents(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let len = data.len() as u64;
        if range.start > len {
            return Err(anyhow!("range {}..{} not satisfiable for {} bytes", range.start, range.end, len).into());
        }
        let end = range.end.min(len);
        Ok(data.slice(range.start as usize..end as usize))
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.count();
        self.objects
            .lock()
            .get(key)
            .map(|o| ObjectMeta {
                size: o.data.len() as u64,
                last_modified: Some(o.modified),
            })
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.count();
        let n = self.stats.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let faults = self.faults.lock();
            if faults.fail_delete_call == Some(n) || faults.fail_delete_key.as_deref() == Some(key) {
                return Err(anyhow!("injected delete failure: call={}, key={}", n, key).into());
            }
        }
        // S3 语义：删除不存在的对象也返回成功
        self.objects.lock().remove(key);
        Ok(())
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation: Option<String>,
        max_keys: Option<usize>,
    ) -> StorageResult<ListPage> {
        self.count();
        let limit = max_keys.unwrap_or(self.page_size).min(self.page_size).max(1);
        let objects = self.objects.lock();

        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.as_deref().map_or(true, |after| key.as_str() > after));

        let page: Vec<ObjectInfo> = matching
            .by_ref()
            .take(limit)
            .map(|(key, o)| ObjectInfo {
                key: key.clone(),
                size: o.data.len() as u64,
                last_modified: Some(o.modified),
            })
            .collect();
        let next_token = if matching.next().is_some() {
            page.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ListPage { objects: page, next_token })
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> StorageResult<()> {
        self.count();
        let mut objects = self.objects.lock();
        let data = objects
            .get(src_key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(src_key.to_string()))?;
        objects.insert(dst_key.to_string(), StoredObject { data, modified: Utc::now() });
        Ok(())
    }

    async fn initiate_multipart(&self, key: &str) -> StorageResult<String> {
        self.count();
        if self.faults.lock().fail_initiate {
            return Err(anyhow!("injected initiate failure for {}", key).into());
        }
        let upload_id = uuid::Uuid::new_v4().to_string();
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload { key: key.to_string(), parts: BTreeMap::new() },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> StorageResult<String> {
        self.count();
        if self.faults.lock().fail_part == Some(part_number) {
            return Err(anyhow!("injected failure for part {}", part_number).into());
        }
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StorageError::NotFound(format!("upload {}", upload_id)))?;
        let etag = Self::etag(&data);
        upload.parts.insert(part_number, (etag.clone(), Bytes::from(data)));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        self.count();
        if self.faults.lock().fail_complete {
            return Err(anyhow!("injected complete failure for {}", key).into());
        }
        if parts.is_empty() {
            return Err(anyhow!("MalformedXML: no parts for {}", key).into());
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(anyhow!("InvalidPartOrder: parts must be ascending").into());
        }

        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StorageError::NotFound(format!("upload {}", upload_id)))?;

        let mut body = Vec::new();
        for part in &parts {
            match upload.parts.get(&part.part_number) {
                Some((etag, data)) if *etag == part.etag => body.extend_from_slice(data),
                _ => return Err(anyhow!("InvalidPart: part {} etag mismatch", part.part_number).into()),
            }
        }

        uploads.remove(upload_id);
        drop(uploads);
        self.completed_orders
            .lock()
            .push(parts.iter().map(|p| p.part_number).collect());
        self.insert(key, body);
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        self.count();
        self.stats.aborts.fetch_add(1, Ordering::SeqCst);
        self.uploads.lock().remove(upload_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_pagination() {
        let client = MemoryClient::new().with_page_size(2);
        for key in ["p/a", "p/b", "p/c", "q/d"] {
            client.insert(key, "x");
        }

        let first = client.list_objects("p/", None, None).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("p/b"));

        let second = client.list_objects("p/", first.next_token, None).await.unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "p/c");
        assert!(second.next_token.is_none());
    }

    #[tokio::test]
    async fn test_complete_rejects_out_of_order_parts() {
        let client = MemoryClient::new();
        let id = client.initiate_multipart("k").await.unwrap();
        let e1 = client.upload_part("k", &id, 1, b"ab".to_vec()).await.unwrap();
        let e2 = client.upload_part("k", &id, 2, b"cd".to_vec()).await.unwrap();

        let reversed = vec![
            CompletedPart { part_number: 2, etag: e2.clone() },
            CompletedPart { part_number: 1, etag: e1.clone() },
        ];
        assert!(client.complete_multipart("k", &id, reversed).await.is_err());

        let ordered = vec![
            CompletedPart { part_number: 1, etag: e1 },
            CompletedPart { part_number: 2, etag: e2 },
        ];
        client.complete_multipart("k", &id, ordered).await.unwrap();
        assert_eq!(client.contents("k").unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(client.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_range_is_clamped() {
        let client = MemoryClient::new();
        client.insert("k", "hello");
        let data = client.get_object_range("k", 3..100).await.unwrap();
        assert_eq!(data, Bytes::from_static(b"lo"));
        assert!(client.get_object_range("k", 10..20).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok_and_counted() {
        let client = MemoryClient::new();
        client.delete_object("missing").await.unwrap();
        assert_eq!(client.delete_calls(), 1);
        assert_eq!(client.calls(), 1);
    }
}
