//! S3驱动核心实现
//!
//! 把逻辑路径映射为对象键后，简单操作直接调用客户端，
//! 流式读写、列表、递归删除交给各自的组件。

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::client::{ObjectClient, RustS3Client};
use super::config::{S3Config, StoreIdentity};
use super::deleter::RecursiveDeleter;
use super::listing::ListingAggregator;
use super::reader::ChunkedReader;
use super::writer::MultipartWriter;
use crate::storage::{
    ByteStream, Capability, Entry, Presence, ReadOptions, StorageDriver, StorageError, StorageResult,
    StreamWriter,
};
use crate::utils::{dir_prefix, join_key};

/// S3驱动
pub struct S3Driver {
    config: S3Config,
    client: Arc<dyn ObjectClient>,
}

impl S3Driver {
    /// 创建新的S3驱动实例
    pub fn new(config: S3Config) -> StorageResult<Self> {
        config.validate()?;
        let client = RustS3Client::new(&config)?;
        tracing::info!(
            "S3驱动已创建: bucket={}, endpoint={}, root={}",
            config.bucket,
            config.resolved_endpoint(),
            config.root_path
        );
        Ok(Self {
            config,
            client: Arc::new(client),
        })
    }

    /// Build a driver on top of any object client / 使用指定客户端创建驱动
    pub fn with_client(config: S3Config, client: Arc<dyn ObjectClient>) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    pub fn store_identity(&self) -> StoreIdentity {
        self.config.store_identity()
    }

    /// 获取完整的对象键
    fn object_key(&self, path: &str) -> String {
        join_key(&self.config.root_path, path)
    }

    /// 获取目录前缀
    fn prefix(&self, path: &str) -> String {
        dir_prefix(&self.config.root_path, path)
    }

    fn deleter(&self) -> RecursiveDeleter {
        RecursiveDeleter::new(self.client.clone(), self.config.delete_concurrency)
    }

    fn file_key(&self, path: &str) -> StorageResult<String> {
        let key = self.object_key(path);
        if key.is_empty() {
            return Err(StorageError::NotFound(format!("{} is the root directory", path)));
        }
        Ok(key)
    }
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn name(&self) -> &str {
        "S3"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_range_read: true,
            can_multipart_upload: true,
            can_server_side_copy: true,
            can_batch_operations: true,
            atomic_rename: false,
        }
    }

    async fn list(&self, path: &str) -> StorageResult<Vec<Entry>> {
        let prefix = self.prefix(path);
        let mut aggregator = ListingAggregator::new(prefix.clone());
        let mut continuation = None;
        let mut pages = 0usize;

        // 聚合必须覆盖所有分页
        loop {
            let page = self.client.list_objects(&prefix, continuation, None).await?;
            pages += 1;
            aggregator.extend(&page.objects);
            match page.next_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        let entries = aggregator.finish();
        tracing::debug!("S3列表: prefix={}, pages={}, entries={}", prefix, pages, entries.len());
        Ok(entries)
    }

    async fn read(&self, path: &str) -> StorageResult<Bytes> {
        let key = self.file_key(path)?;
        tracing::debug!("S3读取: key={}", key);
        self.client.get_object(&key).await
    }

    async fn open_stream(&self, path: &str, options: ReadOptions) -> StorageResult<ByteStream> {
        let key = self.file_key(path)?;
        let reader = ChunkedReader::new(self.client.clone(), key)
            .with_concurrency(options.max_concurrency.unwrap_or(self.config.download_concurrency))
            .with_chunk_size(options.chunk_size.unwrap_or(self.config.download_chunk_size));
        let reader = match options.timeout.or_else(|| self.config.download_timeout()) {
            Some(timeout) => reader.with_timeout(timeout),
            None => reader.without_timeout(),
        };
        reader.open(options.range).await
    }

    async fn put(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let key = self.file_key(path)?;
        tracing::debug!("S3上传: key={}, size={}", key, data.len());
        self.client.put_object(&key, &data).await
    }

    async fn open_writer(&self, path: &str) -> StorageResult<Box<dyn StreamWriter>> {
        let key = self.file_key(path)?;
        Ok(Box::new(MultipartWriter::new(
            self.client.clone(),
            key,
            self.config.effective_part_size(),
        )))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let key = self.file_key(path)?;
        tracing::debug!("S3删除: key={}", key);
        match self.client.delete_object(&key).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn exists(&self, path: &str) -> StorageResult<Presence> {
        let key = self.object_key(path);
        if key.is_empty() {
            return Ok(Presence::Dir);
        }
        match self.client.head_object(&key).await {
            Ok(_) => return Ok(Presence::File),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let page = self.client.list_objects(&self.prefix(path), None, Some(1)).await?;
        if page.objects.is_empty() {
            Ok(Presence::Missing)
        } else {
            Ok(Presence::Dir)
        }
    }

    async fn create_dir(&self, path: &str) -> StorageResult<()> {
        let marker = self.prefix(path);
        if marker.is_empty() {
            return Ok(());
        }
        tracing::debug!("S3创建目录: marker={}", marker);
        self.client.put_object(&marker, &[]).await
    }

    async fn delete_dir(&self, path: &str, recursive: bool) -> StorageResult<()> {
        let prefix = self.prefix(path);
        if recursive {
            let removed = self.deleter().delete_all(&prefix).await?;
            tracing::debug!("S3递归删除目录: prefix={}, removed={}", prefix, removed);
            Ok(())
        } else {
            self.deleter().delete_empty(&prefix).await
        }
    }

    async fn move_item(&self, old_path: &str, new_path: &str) -> StorageResult<()> {
        let src = self.file_key(old_path)?;
        let dst = self.file_key(new_path)?;
        if src == dst {
            return Ok(());
        }
        tracing::debug!("S3移动: {} -> {}", src, dst);
        // 非原子：复制成功后删除失败时，目标保留，错误返回给调用方
        self.client.copy_object(&src, &dst).await?;
        self.client.delete_object(&src).await
    }

    async fn copy_item(&self, old_path: &str, new_path: &str) -> StorageResult<()> {
        let src = self.file_key(old_path)?;
        let dst = self.file_key(new_path)?;
        tracing::debug!("S3复制: {} -> {}", src, dst);
        self.client.copy_object(&src, &dst).await
    }

    async fn copy_from(
        &self,
        source: &dyn StorageDriver,
        old_path: &str,
        new_path: &str,
    ) -> StorageResult<()> {
        let source = match source.as_any().downcast_ref::<S3Driver>() {
            Some(driver) if driver.store_identity() == self.store_identity() => driver,
            _ => {
                return Err(StorageError::Unsupported(format!(
                    "copy from {} into bucket {} requires the same store",
                    source.name(),
                    self.config.bucket
                )))
            }
        };
        let src = source.file_key(old_path)?;
        let dst = self.file_key(new_path)?;
        tracing::debug!("S3跨挂载复制: {} -> {}", src, dst);
        self.client.copy_object(&src, &dst).await
    }

    async fn clear(&self) -> StorageResult<()> {
        let prefix = self.prefix("/");
        let removed = self.deleter().delete_all(&prefix).await?;
        tracing::info!("S3根目录已清空: prefix={}, removed={}", prefix, removed);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::s3::memory::{Faults, MemoryClient};
    use futures::TryStreamExt;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn config(root: &str) -> S3Config {
        S3Config {
            bucket: "test".to_string(),
            endpoint: "http://localhost:9000".to_string(),
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
            root_path: root.to_string(),
            ..Default::default()
        }
    }

    fn driver(client: &Arc<MemoryClient>) -> S3Driver {
        init_tracing();
        S3Driver::with_client(config("/data"), client.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_put_read_and_root_scoping() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);

        d.put("/docs/a.txt", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(client.keys(), vec!["data/docs/a.txt".to_string()]);
        assert_eq!(d.read("docs/a.txt").await.unwrap(), Bytes::from_static(b"hello"));
        assert!(matches!(d.read("/docs/missing.txt").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_multipart_round_trip_through_driver() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);
        let data: Vec<u8> = (0..12 * 1024 * 1024 + 17).map(|i| (i % 253) as u8).collect();

        let mut w = d.open_writer("/big.bin").await.unwrap();
        for chunk in data.chunks(1024 * 1024 + 3) {
            w.append(chunk).await.unwrap();
        }
        w.finish().await.unwrap();
        assert_eq!(client.completed_part_orders(), vec![vec![1, 2, 3]]);

        let options = ReadOptions::default()
            .with_chunk_size(1024 * 1024)
            .with_concurrency(3);
        let chunks: Vec<Bytes> = d.open_stream("/big.bin", options).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_open_reader_reads_range() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);
        d.put("/f.bin", Bytes::from(vec![7u8; 100])).await.unwrap();

        let options = ReadOptions::default().with_range(10..40).with_chunk_size(8);
        let mut reader = d.open_reader("/f.bin", options).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len(), 30);

        let err = d.open_reader("/none.bin", ReadOptions::default()).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_three_entries() {
        let client = Arc::new(MemoryClient::new().with_page_size(1));
        let d = driver(&client);
        d.put("/p/a.txt", Bytes::from(vec![0u8; 10])).await.unwrap();
        d.put("/p/b.txt", Bytes::from(vec![0u8; 20])).await.unwrap();
        d.put("/p/dir/c.txt", Bytes::from(vec![0u8; 30])).await.unwrap();

        let entries = d.list("/p").await.unwrap();
        let summary: Vec<(&str, bool, u64)> = entries.iter().map(|e| (e.name(), e.is_dir(), e.stat().size)).collect();
        assert_eq!(summary, vec![("a.txt", false, 10), ("b.txt", false, 20), ("dir", true, 30)]);

        assert!(d.list("/nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_shows_markers() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);
        d.create_dir("/p/empty").await.unwrap();
        d.create_dir("/p/full").await.unwrap();
        d.put("/p/full/a", Bytes::from_static(b"xyz")).await.unwrap();

        let entries = d.list("/p").await.unwrap();
        let summary: Vec<(&str, bool, u64)> = entries.iter().map(|e| (e.name(), e.is_dir(), e.stat().size)).collect();
        assert_eq!(summary, vec![("empty", false, 0), ("full", true, 3)]);
        assert!(d.list("/p/empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_download_timeout_reads() {
        let client = Arc::new(MemoryClient::new().with_range_latency(|_| Duration::from_millis(2)));
        let mut cfg = config("/data");
        cfg.download_timeout_secs = 0;
        let d = S3Driver::with_client(cfg, client.clone()).unwrap();
        d.put("/f", Bytes::from(vec![3u8; 40])).await.unwrap();

        let chunks: Vec<Bytes> = d
            .open_stream("/f", ReadOptions::default().with_chunk_size(16))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), vec![3u8; 40]);
    }

    #[tokio::test]
    async fn test_huge_chunk_size_with_range() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);
        let data: Vec<u8> = (0..40u8).collect();
        d.put("/f", Bytes::from(data.clone())).await.unwrap();

        let options = ReadOptions::default().with_range(5..17).with_chunk_size(u64::MAX);
        let chunks: Vec<Bytes> = d.open_stream("/f", options).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), data[5..17].to_vec());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);
        d.delete("/never-existed").await.unwrap();
        d.put("/x", Bytes::from_static(b"1")).await.unwrap();
        d.delete("/x").await.unwrap();
        d.delete("/x").await.unwrap();
        assert!(client.keys().is_empty());
    }

    #[tokio::test]
    async fn test_exists_tri_state() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);
        d.put("/dir/file", Bytes::from_static(b"1")).await.unwrap();
        d.create_dir("/empty").await.unwrap();

        assert_eq!(d.exists("/dir/file").await.unwrap(), Presence::File);
        assert_eq!(d.exists("/dir").await.unwrap(), Presence::Dir);
        assert_eq!(d.exists("/empty").await.unwrap(), Presence::Dir);
        assert_eq!(d.exists("/").await.unwrap(), Presence::Dir);
        assert_eq!(d.exists("/ghost").await.unwrap(), Presence::Missing);
        assert!(client.keys().contains(&"data/empty/".to_string()));
    }

    #[tokio::test]
    async fn test_delete_dir_variants() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);
        d.create_dir("/full").await.unwrap();
        d.put("/full/a", Bytes::from_static(b"1")).await.unwrap();
        d.put("/full/sub/b", Bytes::from_static(b"2")).await.unwrap();
        d.create_dir("/empty").await.unwrap();

        let err = d.delete_dir("/full", false).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(client.keys().len(), 4);

        d.delete_dir("/empty", false).await.unwrap();
        d.delete_dir("/empty", false).await.unwrap();
        d.delete_dir("/full", true).await.unwrap();
        assert!(client.keys().is_empty());
    }

    #[tokio::test]
    async fn test_move_and_copy() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);
        d.put("/p", Bytes::from_static(b"original")).await.unwrap();

        d.copy_item("/p", "/c").await.unwrap();
        d.move_item("/p", "/q").await.unwrap();
        assert_eq!(d.read("/q").await.unwrap(), Bytes::from_static(b"original"));
        assert_eq!(d.read("/c").await.unwrap(), Bytes::from_static(b"original"));
        assert!(d.read("/p").await.unwrap_err().is_not_found());

        d.move_item("/q", "/q").await.unwrap();
        assert_eq!(d.read("/q").await.unwrap(), Bytes::from_static(b"original"));

        assert!(matches!(d.copy_item("/gone", "/z").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_move_keeps_destination_when_delete_fails() {
        let client = Arc::new(MemoryClient::new());
        let d = driver(&client);
        d.put("/src", Bytes::from_static(b"v")).await.unwrap();
        client.set_faults(Faults { fail_delete_key: Some("data/src".to_string()), ..Default::default() });

        assert!(d.move_item("/src", "/dst").await.is_err());
        assert!(client.contents("data/dst").is_some());
        assert!(client.contents("data/src").is_some());
    }

    #[tokio::test]
    async fn test_copy_from_same_store() {
        let client = Arc::new(MemoryClient::new());
        let dst = driver(&client);
        let src = S3Driver::with_client(config("/other"), client.clone()).unwrap();
        src.put("/f", Bytes::from_static(b"shared")).await.unwrap();

        dst.copy_from(&src, "/f", "/g").await.unwrap();
        assert_eq!(dst.read("/g").await.unwrap(), Bytes::from_static(b"shared"));
        assert!(client.contents("data/g").is_some());
    }

    #[tokio::test]
    async fn test_copy_from_other_store_is_unsupported() {
        let src_client = Arc::new(MemoryClient::new());
        let dst_client = Arc::new(MemoryClient::new());
        let mut other = config("/data");
        other.endpoint = "http://elsewhere:9000".to_string();
        let src = S3Driver::with_client(other, src_client.clone()).unwrap();
        let dst = driver(&dst_client);

        let err = dst.copy_from(&src, "/f", "/g").await.unwrap_err();
        assert!(matches!(err, StorageError::Unsupported(_)));
        assert_eq!(src_client.calls(), 0);
        assert_eq!(dst_client.calls(), 0);
    }

    #[tokio::test]
    async fn test_clear_only_touches_root() {
        let client = Arc::new(MemoryClient::new().with_page_size(2));
        client.insert("outside/keep", vec![1u8]);
        let d = driver(&client);
        for i in 0..5 {
            d.put(&format!("/n/{}", i), Bytes::from_static(b"x")).await.unwrap();
        }

        d.clear().await.unwrap();
        assert_eq!(client.keys(), vec!["outside/keep".to_string()]);
    }

    #[test]
    fn test_with_client_validates() {
        let client: Arc<dyn ObjectClient> = Arc::new(MemoryClient::new());
        let err = S3Driver::with_client(S3Config::default(), client).err().unwrap();
        assert!(matches!(err, StorageError::InvalidConfig(_)));
    }
}
