//! 前缀删除
//!
//! 递归删除先取完所有分页，再以有界并发逐个删除；第一个失败即中止，
//! 已删除的对象不会恢复。

use std::sync::Arc;

use futures::stream::{self, TryStreamExt};

use super::client::ObjectClient;
use crate::storage::{StorageError, StorageResult};

/// Keys probed by the non-recursive variant: the marker plus one child / 非递归探测数量
const EMPTY_PROBE_KEYS: usize = 2;

pub struct RecursiveDeleter {
    client: Arc<dyn ObjectClient>,
    concurrency: usize,
}

impl RecursiveDeleter {
    pub fn new(client: Arc<dyn ObjectClient>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Every key under `prefix`, across all listing pages / 列出前缀下全部键
    pub async fn collect_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.client.list_objects(prefix, continuation, None).await?;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            match page.next_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Delete everything under `prefix`; returns the number of keys removed / 递归删除
    pub async fn delete_all(&self, prefix: &str) -> StorageResult<usize> {
        let keys = self.collect_keys(prefix).await?;
        let total = keys.len();
        tracing::debug!("S3递归删除: prefix={}, keys={}, concurrency={}", prefix, total, self.concurrency);

        let client = &self.client;
        stream::iter(keys.into_iter().map(Ok::<_, StorageError>))
            .try_for_each_concurrent(self.concurrency, |key| async move {
                client.delete_object(&key).await.map_err(|e| {
                    tracing::debug!("S3递归删除失败: key={}, error={}", key, e);
                    e
                })
            })
            .await?;
        Ok(total)
    }

    /// Delete the directory marker at `prefix` if nothing else lives below it / 删除空目录
    pub async fn delete_empty(&self, prefix: &str) -> StorageResult<()> {
        let page = self
            .client
            .list_objects(prefix, None, Some(EMPTY_PROBE_KEYS))
            .await?;
        if page.objects.iter().any(|o| o.key != prefix) {
            return Err(StorageError::AlreadyExists(format!("directory not empty: {}", prefix)));
        }
        if prefix.is_empty() {
            return Ok(());
        }
        self.client.delete_object(prefix).await
    }
}
