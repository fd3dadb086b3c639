//! S3-compatible object storage presented as a hierarchical filesystem.
//! 把 S3 兼容的对象存储挂载为层级文件系统。

pub mod utils;
pub mod storage;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

// Register all storage drivers (call unified registration function from drivers module) / 注册所有存储驱动
pub async fn register_storage_drivers(manager: &storage::StorageManager) -> storage::StorageResult<()> {
    drivers::register_all(manager).await
}
