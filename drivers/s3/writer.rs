//! S3 分片上传写入器
//!
//! 状态机：Accumulating -> Finalized。
//! 第一次写入数据时初始化分片上传，缓冲区满一片即上传，
//! finish 时上传剩余数据并按分片号升序完成上传。

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;

use super::client::{CompletedPart, ObjectClient};
use crate::storage::{StorageError, StorageResult, StreamWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Accumulating,
    Finalized,
}

/// Remote multipart session / 远端分片会话
struct Session {
    upload_id: String,
    next_part: u32,
    parts: Vec<CompletedPart>,
}

/// Multipart upload sink, owned by exactly one writer / 分片上传写入器
pub struct MultipartWriter {
    client: Arc<dyn ObjectClient>,
    key: String,
    part_size: usize,
    buffer: BytesMut,
    session: Option<Session>,
    state: WriterState,
    bytes_written: u64,
}

impl MultipartWriter {
    pub fn new(client: Arc<dyn ObjectClient>, key: impl Into<String>, part_size: usize) -> Self {
        Self {
            client,
            key: key.into(),
            part_size: part_size.max(1),
            buffer: BytesMut::new(),
            session: None,
            state: WriterState::Accumulating,
            bytes_written: 0,
        }
    }

    /// Parts uploaded so far / 已上传分片数
    pub fn parts_uploaded(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.parts.len())
    }

    fn ensure_open(&self) -> StorageResult<()> {
        match self.state {
            WriterState::Accumulating => Ok(()),
            WriterState::Finalized => Err(StorageError::InvalidState(format!(
                "writer for {} is already finalized",
                self.key
            ))),
        }
    }

    async fn ensure_session(&mut self) -> StorageResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let upload_id = self
            .client
            .initiate_multipart(&self.key)
            .await
            .map_err(|e| StorageError::Setup(format!("初始化分片上传失败: key={}, error={}", self.key, e)))?;
        tracing::debug!("S3分片上传开始: key={}, upload_id={}", self.key, upload_id);
        self.session = Some(Session {
            upload_id,
            next_part: 1,
            parts: Vec::new(),
        });
        Ok(())
    }

    /// Upload the first `len` buffered bytes as the next part / 上传缓冲区前len字节
    async fn flush_part(&mut self, len: usize) -> StorageResult<()> {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Err(StorageError::InvalidState("no multipart session".to_string())),
        };
        let chunk = self.buffer.split_to(len);
        let part_number = session.next_part;

        tracing::debug!("S3上传分片: key={}, part={}, size={}", self.key, part_number, chunk.len());
        let etag = self
            .client
            .upload_part(&self.key, &session.upload_id, part_number, chunk.to_vec())
            .await?;

        session.parts.push(CompletedPart { part_number, etag });
        session.next_part += 1;
        Ok(())
    }

    /// Fail the writer and release the remote session / 失败时结束会话
    async fn fail(&mut self, err: StorageError) -> StorageError {
        self.state = WriterState::Finalized;
        self.buffer.clear();
        self.abort_session().await;
        err
    }

    async fn abort_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.client.abort_multipart(&self.key, &session.upload_id).await {
                tracing::warn!("S3取消分片上传失败: key={}, upload_id={}, error={}", self.key, session.upload_id, e);
            } else {
                tracing::debug!("S3分片上传已取消: key={}", self.key);
            }
        }
    }

    async fn do_finish(&mut self) -> StorageResult<()> {
        if self.session.is_none() {
            // 从未写入数据：直接写入空对象
            return self.client.put_object(&self.key, &[]).await;
        }
        if !self.buffer.is_empty() {
            let len = self.buffer.len();
            self.flush_part(len).await?;
        }

        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Err(StorageError::InvalidState("no multipart session".to_string())),
        };
        let mut parts = std::mem::take(&mut session.parts);
        parts.sort_by_key(|p| p.part_number);
        let upload_id = session.upload_id.clone();

        self.client.complete_multipart(&self.key, &upload_id, parts).await?;
        self.session = None;
        tracing::debug!("S3分片上传完成: key={}, bytes={}", self.key, self.bytes_written);
        Ok(())
    }
}

#[async_trait]
impl StreamWriter for MultipartWriter {
    async fn append(&mut self, data: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.ensure_session().await {
            self.state = WriterState::Finalized;
            return Err(e);
        }

        self.buffer.extend_from_slice(data);
        self.bytes_written += data.len() as u64;

        while self.buffer.len() >= self.part_size {
            if let Err(e) = self.flush_part(self.part_size).await {
                return Err(self.fail(e).await);
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        let result = self.do_finish().await;
        match result {
            Ok(()) => {
                self.state = WriterState::Finalized;
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn abort(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.state = WriterState::Finalized;
        self.buffer.clear();
        self.abort_session().await;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
