//! Storage error taxonomy / 存储错误分类
//!
//! Every driver operation returns [`StorageResult`]. Absence is always reported
//! as [`StorageError::NotFound`], never as a raw transport error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Object or prefix absent / 对象或前缀不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// Non-empty directory on non-recursive delete / 目录非空
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Multipart initiate failed, nothing was written / 分片上传初始化失败
    #[error("multipart upload setup failed: {0}")]
    Setup(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Operation on a writer that is already finalized / 写入器已结束
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Network, timeout or non-2xx response / 网络、超时或非2xx响应
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for std::io::Error {
    fn from(err: StorageError) -> Self {
        use std::io::ErrorKind;
        let kind = match &err {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::Unsupported(_) => ErrorKind::Unsupported,
            StorageError::InvalidConfig(_) | StorageError::InvalidState(_) => ErrorKind::InvalidInput,
            StorageError::Setup(_) | StorageError::Transport(_) => ErrorKind::Other,
        };
        std::io::Error::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_not_found_display() {
        let err = StorageError::NotFound("docs/a.txt".to_string());
        assert_eq!(err.to_string(), "not found: docs/a.txt");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_transport_is_transparent() {
        let err: StorageError = anyhow!("connection reset").into();
        assert_eq!(err.to_string(), "connection reset");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_io_error_kind_mapping() {
        let io: std::io::Error = StorageError::NotFound("x".to_string()).into();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);

        let io: std::io::Error = StorageError::AlreadyExists("d".to_string()).into();
        assert_eq!(io.kind(), std::io::ErrorKind::AlreadyExists);

        let io: std::io::Error = StorageError::Transport(anyhow!("boom")).into();
        assert_eq!(io.kind(), std::io::ErrorKind::Other);
    }
}
