//! S3 对象存储驱动
//!
//! 把扁平的桶模拟成层级文件系统：分片上传、分块并发下载、
//! 目录列表聚合与递归删除。

pub mod client;
pub mod config;
pub mod deleter;
pub mod driver;
pub mod factory;
pub mod listing;
pub mod memory;
pub mod reader;
pub mod writer;

pub use client::{ObjectClient, RustS3Client};
pub use config::S3Config;
pub use driver::S3Driver;
pub use factory::S3DriverFactory;
pub use memory::MemoryClient;
