use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// Configuration item definition / 配置项定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigItem {
    pub name: String,
    /// Display title (friendly name) / 显示标题
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl ConfigItem {
    pub fn new(name: &str, item_type: &str) -> Self {
        Self {
            name: name.to_string(),
            title: None,
            item_type: item_type.to_string(),
            default: None,
            required: false,
            help: None,
        }
    }

    pub fn title(mut self, val: &str) -> Self {
        self.title = Some(val.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, val: &str) -> Self {
        self.default = Some(val.to_string());
        self
    }

    pub fn help(mut self, val: &str) -> Self {
        self.help = Some(val.to_string());
        self
    }
}

/// Driver configuration information / 驱动配置信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_root: Option<String>,
}

/// Complete driver information / 驱动完整信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverInfo {
    /// Common configuration items (mount_path) / 通用配置项
    pub common: Vec<ConfigItem>,
    /// Driver-specific configuration items / 驱动特有配置项
    pub additional: Vec<ConfigItem>,
    /// Basic driver configuration / 驱动基本配置
    pub config: DriverConfig,
}

/// Generate common configuration items shared by all drivers / 生成通用配置项
pub fn get_common_items() -> Vec<ConfigItem> {
    vec![
        ConfigItem::new("mount_path", "string")
            .required()
            .help("Mount path, must be unique"),
    ]
}

/// Stat of a listed name / 列表条目的元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Directory listing entry / 目录列表条目
///
/// `Dir` entries of object-store drivers are synthesized: `size` is the sum of
/// all keys below the name, `modified` the latest of their timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry {
    File(Stat),
    Dir(Stat),
}

impl Entry {
    pub fn stat(&self) -> &Stat {
        match self {
            Entry::File(stat) | Entry::Dir(stat) => stat,
        }
    }

    pub fn name(&self) -> &str {
        &self.stat().name
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Dir(_))
    }
}

/// Answer of `exists` / 路径存在状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    File,
    Dir,
    Missing,
}

impl Presence {
    pub fn exists(self) -> bool {
        self != Presence::Missing
    }
}

/// Driver capability declaration / 驱动能力声明
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capability {
    /// Support range reading (resumable download) / 支持范围读取
    pub can_range_read: bool,
    /// Support multipart upload / 支持分片上传
    pub can_multipart_upload: bool,
    /// Support server-side copy (no download needed) / 支持服务端复制
    pub can_server_side_copy: bool,
    /// Support batch operations / 支持批量操作
    pub can_batch_operations: bool,
    /// Rename is atomic / 重命名是否原子
    pub atomic_rename: bool,
}

/// Per-call overrides for streaming reads / 流式读取参数
///
/// `None` falls back to the driver configuration.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Byte range `[start, end)`; end is clamped to the object size / 字节范围
    pub range: Option<Range<u64>>,
    pub max_concurrency: Option<usize>,
    /// Per range fetch, zero means no limit / 单个分块的超时（0表示不限制）
    pub timeout: Option<Duration>,
    pub chunk_size: Option<u64>,
}

impl ReadOptions {
    pub fn with_range(mut self, range: Range<u64>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = Some(size);
        self
    }
}

/// Lazy ordered sequence of byte chunks / 惰性有序字节流
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

/// Write sink returned by `open_writer` / 流式写入句柄
///
/// Nothing is visible at the target path until `finish` returns `Ok`.
#[async_trait]
pub trait StreamWriter: Send {
    /// Append bytes of any length / 追加任意长度的数据
    async fn append(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Flush the remainder and commit the object / 提交对象
    async fn finish(&mut self) -> StorageResult<()>;

    /// Give up the write and release remote state / 放弃写入
    async fn abort(&mut self) -> StorageResult<()>;

    /// Bytes accepted so far / 已接收的字节数
    fn bytes_written(&self) -> u64;
}

/// Storage driver interface / 存储驱动接口
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name / 驱动名称
    fn name(&self) -> &str;

    /// Driver version / 驱动版本
    fn version(&self) -> &str;

    /// Driver capabilities / 驱动能力
    fn capabilities(&self) -> Capability;

    /// List immediate children of a directory / 列出目录内容
    async fn list(&self, path: &str) -> StorageResult<Vec<Entry>>;

    /// Read a whole file / 读取整个文件
    async fn read(&self, path: &str) -> StorageResult<Bytes>;

    /// Open a lazy chunk stream / 打开流式读取
    async fn open_stream(&self, path: &str, options: ReadOptions) -> StorageResult<ByteStream>;

    /// Open file reader, built on `open_stream` / 打开文件读取器
    async fn open_reader(
        &self,
        path: &str,
        options: ReadOptions,
    ) -> StorageResult<Box<dyn AsyncRead + Unpin + Send>> {
        let stream = self.open_stream(path, options).await?;
        let stream = stream.map(|chunk| chunk.map_err(std::io::Error::from));
        Ok(Box::new(StreamReader::new(stream)))
    }

    /// Put complete file data / 上传完整文件
    async fn put(&self, path: &str, data: Bytes) -> StorageResult<()>;

    /// Open file writer / 打开文件写入器
    async fn open_writer(&self, path: &str) -> StorageResult<Box<dyn StreamWriter>>;

    /// Delete a file; absent files are not an error / 删除文件（幂等）
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Whether the path is a file, a directory, or missing / 判断路径是否存在
    async fn exists(&self, path: &str) -> StorageResult<Presence>;

    /// Create directory / 创建目录
    async fn create_dir(&self, path: &str) -> StorageResult<()>;

    /// Delete directory / 删除目录
    async fn delete_dir(&self, path: &str, recursive: bool) -> StorageResult<()>;

    /// Move file / 移动文件
    async fn move_item(&self, old_path: &str, new_path: &str) -> StorageResult<()>;

    /// Copy file / 复制文件
    async fn copy_item(&self, old_path: &str, new_path: &str) -> StorageResult<()>;

    /// Copy a file from another driver instance into this one / 跨存储复制
    async fn copy_from(
        &self,
        source: &dyn StorageDriver,
        _old_path: &str,
        _new_path: &str,
    ) -> StorageResult<()> {
        Err(StorageError::Unsupported(format!(
            "copy from {} into {}",
            source.name(),
            self.name()
        )))
    }

    /// Remove everything under the root / 清空根目录
    async fn clear(&self) -> StorageResult<()>;

    /// Downcast support for same-store checks / 用于同存储判断的向下转型
    fn as_any(&self) -> &dyn std::any::Any;
}

pub mod error;
pub mod manager;

pub use error::{StorageError, StorageResult};
pub use manager::{DriverBox, DriverFactory, StorageManager};
