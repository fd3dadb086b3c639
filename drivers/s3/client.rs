//! 对象存储客户端边界
//!
//! `ObjectClient` 是驱动与对象存储之间唯一的接口：只提供原语，
//! 不做重试，不做路径处理。桶在构造时绑定。

use std::ops::Range;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::serde_types::Part;
use s3::Region;

use super::config::S3Config;
use crate::storage::{StorageError, StorageResult};

const CONTENT_TYPE: &str = "application/octet-stream";

/// 列表中的单个对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// HEAD 结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// 一页列表结果，`next_token` 为空表示已到末页
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub next_token: Option<String>,
}

/// 已上传分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Object store primitives / 对象存储原语
///
/// Implementations report a missing key as `StorageError::NotFound` and every
/// other failure as `StorageError::Transport`.
#[async_trait]
pub trait ObjectClient: Send + Sync + 'static {
    async fn put_object(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    async fn get_object(&self, key: &str) -> StorageResult<Bytes>;

    /// `range` is half-open `[start, end)` / 半开区间
    async fn get_object_range(&self, key: &str, range: Range<u64>) -> StorageResult<Bytes>;

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMeta>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Flat listing, no delimiter / 平铺列表（不使用分隔符）
    async fn list_objects(
        &self,
        prefix: &str,
        continuation: Option<String>,
        max_keys: Option<usize>,
    ) -> StorageResult<ListPage>;

    /// Server-side copy inside the bound bucket / 桶内服务端复制
    async fn copy_object(&self, src_key: &str, dst_key: &str) -> StorageResult<()>;

    async fn initiate_multipart(&self, key: &str) -> StorageResult<String>;

    /// Returns the part's entity-tag / 返回分片ETag
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> StorageResult<String>;

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()>;
}

/// Parse S3 timestamps (RFC 3339 in listings, RFC 2822 in headers) / 解析时间戳
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// 基于 rust-s3 的客户端
pub struct RustS3Client {
    bucket: Box<Bucket>,
}

impl RustS3Client {
    pub fn new(config: &S3Config) -> StorageResult<Self> {
        Ok(Self {
            bucket: Self::create_bucket(config)?,
        })
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(config: &S3Config) -> StorageResult<Box<Bucket>> {
        let credentials = if config.access_key_id.is_empty() {
            Credentials::default()
        } else {
            Credentials::new(
                Some(&config.access_key_id),
                Some(&config.secret_access_key),
                if config.session_token.is_empty() { None } else { Some(&config.session_token) },
                None,
                None,
            )
        }
        .map_err(|e| StorageError::InvalidConfig(format!("创建S3凭证失败: {}", e)))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.resolved_endpoint(),
        };

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| StorageError::InvalidConfig(format!("创建S3 Bucket失败: {}", e)))?;

        if config.force_path_style {
            bucket = bucket.with_path_style();
        }
        if let Some(timeout) = config.request_timeout() {
            bucket = bucket
                .with_request_timeout(timeout)
                .map_err(|e| StorageError::InvalidConfig(format!("设置请求超时失败: {}", e)))?;
        }

        Ok(bucket)
    }
}

fn check_status(code: u16, op: &str, key: &str) -> StorageResult<()> {
    match code {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        _ => Err(anyhow!("S3 {}失败: key={}, status={}", op, key, code).into()),
    }
}

fn map_s3_error(err: S3Error, op: &str, key: &str) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(key.to_string()),
        other => anyhow!("S3 {}失败: key={}, error={}", op, key, other).into(),
    }
}

#[async_trait]
impl ObjectClient for RustS3Client {
    async fn put_object(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let resp = self
            .bucket
            .put_object(key, data)
            .await
            .map_err(|e| map_s3_error(e, "PutObject", key))?;
        check_status(resp.status_code(), "PutObject", key)
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let resp = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| map_s3_error(e, "GetObject", key))?;
        check_status(resp.status_code(), "GetObject", key)?;
        Ok(Bytes::from(resp.bytes().to_vec()))
    }

    async fn get_object_range(&self, key: &str, range: Range<u64>) -> StorageResult<Bytes> {
        if range.start >= range.end {
            return Ok(Bytes::new());
        }
        // rust-s3 的 end 是闭区间
        let resp = self
            .bucket
            .get_object_range(key, range.start, Some(range.end - 1))
            .await
            .map_err(|e| map_s3_error(e, "GetObjectRange", key))?;
        check_status(resp.status_code(), "GetObjectRange", key)?;
        Ok(Bytes::from(resp.bytes().to_vec()))
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMeta> {
        let (head, code) = self
            .bucket
            .head_object(key)
            .await
            .map_err(|e| map_s3_error(e, "HeadObject", key))?;
        check_status(code, "HeadObject", key)?;
        Ok(ObjectMeta {
            size: head.content_length.unwrap_or(0).max(0) as u64,
            last_modified: head.last_modified.as_deref().and_then(parse_timestamp),
        })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let resp = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| map_s3_error(e, "DeleteObject", key))?;
        check_status(resp.status_code(), "DeleteObject", key)
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation: Option<String>,
        max_keys: Option<usize>,
    ) -> StorageResult<ListPage> {
        let (result, code) = self
            .bucket
            .list_page(prefix.to_string(), None, continuation, None, max_keys)
            .await
            .map_err(|e| map_s3_error(e, "ListObjectsV2", prefix))?;
        check_status(code, "ListObjectsV2", prefix)?;

        let objects = result
            .contents
            .into_iter()
            .map(|obj| ObjectInfo {
                last_modified: parse_timestamp(&obj.last_modified),
                key: obj.key,
                size: obj.size as u64,
            })
            .collect();
        let next_token = if result.is_truncated { result.next_continuation_token } else { None };

        Ok(ListPage { objects, next_token })
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> StorageResult<()> {
        // copy_object_internal的from参数需要URL编码（中文等非ASCII字符）
        let encoded_src = urlencoding::encode(src_key);
        tracing::debug!("S3 CopyObject: src_key={}, encoded={}, dst_key={}", src_key, encoded_src, dst_key);

        let code = self
            .bucket
            .copy_object_internal(&encoded_src, dst_key)
            .await
            .map_err(|e| map_s3_error(e, "CopyObject", src_key))?;
        check_status(code, "CopyObject", src_key)
    }

    async fn initiate_multipart(&self, key: &str) -> StorageResult<String> {
        let resp = self
            .bucket
            .initiate_multipart_upload(key, CONTENT_TYPE)
            .await
            .map_err(|e| map_s3_error(e, "CreateMultipartUpload", key))?;
        Ok(resp.upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> StorageResult<String> {
        let part = self
            .bucket
            .put_multipart_chunk(data, key, part_number, upload_id, CONTENT_TYPE)
            .await
            .map_err(|e| map_s3_error(e, "UploadPart", key))?;
        Ok(part.etag)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        let parts = parts
            .into_iter()
            .map(|p| Part { part_number: p.part_number, etag: p.etag })
            .collect();
        let resp = self
            .bucket
            .complete_multipart_upload(key, upload_id, parts)
            .await
            .map_err(|e| map_s3_error(e, "CompleteMultipartUpload", key))?;
        check_status(resp.status_code(), "CompleteMultipartUpload", key)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.bucket
            .abort_upload(key, upload_id)
            .await
            .map_err(|e| map_s3_error(e, "AbortMultipartUpload", key))
    }
}
