//! S3驱动配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::storage::{StorageError, StorageResult};

/// Smallest part the store accepts, except for the last one / 最小分片大小（最后一片除外）
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// 存储桶名称
    pub bucket: String,
    /// S3端点地址
    /// AWS: https://s3.{region}.amazonaws.com
    /// MinIO: http://localhost:9000
    #[serde(default)]
    pub endpoint: String,
    /// 区域
    #[serde(default = "default_region")]
    pub region: String,
    /// Access Key ID
    #[serde(default)]
    pub access_key_id: String,
    /// Secret Access Key
    #[serde(default)]
    pub secret_access_key: String,
    /// Session Token（用于临时凭证）
    #[serde(default)]
    pub session_token: String,
    /// 根目录路径
    #[serde(default = "default_root")]
    pub root_path: String,
    /// 强制使用路径风格（而非虚拟主机风格）
    /// MinIO等需要设置为true
    #[serde(default)]
    pub force_path_style: bool,
    /// 单次请求超时（秒），0表示使用客户端默认值
    #[serde(default)]
    pub request_timeout_secs: u64,
    /// 分片上传的分片大小（字节），不小于5MB
    #[serde(default = "default_part_size")]
    pub part_size: usize,
    /// 分块下载的块大小（字节）
    #[serde(default = "default_download_chunk_size")]
    pub download_chunk_size: u64,
    /// 分块下载并发数
    #[serde(default = "default_concurrency")]
    pub download_concurrency: usize,
    /// 单个分块下载超时（秒），0表示不限制
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
    /// 递归删除并发数
    #[serde(default = "default_concurrency")]
    pub delete_concurrency: usize,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_root() -> String {
    "/".to_string()
}

fn default_part_size() -> usize {
    MIN_PART_SIZE
}

fn default_download_chunk_size() -> u64 {
    8 * 1024 * 1024
}

fn default_concurrency() -> usize {
    8
}

fn default_download_timeout() -> u64 {
    60
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: String::new(),
            region: default_region(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
            root_path: default_root(),
            force_path_style: false,
            request_timeout_secs: 0,
            part_size: default_part_size(),
            download_chunk_size: default_download_chunk_size(),
            download_concurrency: default_concurrency(),
            download_timeout_secs: default_download_timeout(),
            delete_concurrency: default_concurrency(),
        }
    }
}

/// Identifies the store a config talks to / 存储身份（端点、区域、凭证、桶）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreIdentity {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub bucket: String,
}

impl S3Config {
    /// 校验配置
    pub fn validate(&self) -> StorageResult<()> {
        if self.bucket.trim().is_empty() {
            return Err(StorageError::InvalidConfig("bucket must be non-empty".to_string()));
        }
        if self.access_key_id.is_empty() != self.secret_access_key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "access_key_id and secret_access_key must be provided together".to_string(),
            ));
        }
        if self.download_concurrency == 0 || self.delete_concurrency == 0 {
            return Err(StorageError::InvalidConfig("concurrency must be at least 1".to_string()));
        }
        if self.download_chunk_size == 0 {
            return Err(StorageError::InvalidConfig("download_chunk_size must be positive".to_string()));
        }
        Ok(())
    }

    /// 实际使用的端点（未配置时使用AWS默认端点）
    pub fn resolved_endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            format!("https://s3.{}.amazonaws.com", self.region)
        } else {
            self.endpoint.trim_end_matches('/').to_string()
        }
    }

    pub fn store_identity(&self) -> StoreIdentity {
        StoreIdentity {
            endpoint: self.resolved_endpoint(),
            region: self.region.clone(),
            access_key_id: self.access_key_id.clone(),
            bucket: self.bucket.clone(),
        }
    }

    pub fn effective_part_size(&self) -> usize {
        self.part_size.max(MIN_PART_SIZE)
    }

    /// 单个分块下载超时，0表示不限制
    pub fn download_timeout(&self) -> Option<Duration> {
        if self.download_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.download_timeout_secs))
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.request_timeout_secs))
        }
    }
}
