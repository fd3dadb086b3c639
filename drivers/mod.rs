// Driver package / 驱动包
pub mod s3;

use crate::storage::{StorageManager, StorageResult};

/// Register all drivers to StorageManager / 注册所有驱动
pub async fn register_all(manager: &StorageManager) -> StorageResult<()> {
    // Register S3 driver / 注册S3对象存储驱动
    manager.register_factory(Box::new(s3::S3DriverFactory)).await?;
    Ok(())
}
