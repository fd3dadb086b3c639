//! S3驱动工厂

use serde_json::Value;

use super::config::S3Config;
use super::driver::S3Driver;
use crate::storage::{ConfigItem, DriverConfig, DriverFactory, StorageDriver, StorageError, StorageResult};

/// S3驱动工厂
pub struct S3DriverFactory;

impl DriverFactory for S3DriverFactory {
    fn driver_type(&self) -> &'static str {
        "s3"
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            name: "S3".to_string(),
            default_root: Some("/".to_string()),
        }
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        vec![
            ConfigItem::new("bucket", "string")
                .title("存储桶名称")
                .help("S3存储桶名称")
                .required(),
            ConfigItem::new("endpoint", "string")
                .title("端点地址")
                .help("S3端点URL，留空使用AWS默认端点（MinIO: http://localhost:9000）"),
            ConfigItem::new("region", "string")
                .title("区域")
                .help("S3区域，如 us-east-1、cn-hangzhou")
                .default("us-east-1"),
            ConfigItem::new("access_key_id", "string")
                .title("Access Key ID")
                .help("留空时从环境变量或凭证文件读取"),
            ConfigItem::new("secret_access_key", "password")
                .title("Secret Access Key"),
            ConfigItem::new("session_token", "password")
                .title("Session Token")
                .help("临时凭证的会话令牌（可选）"),
            ConfigItem::new("root_path", "string")
                .title("根目录路径")
                .help("存储桶内的根目录路径")
                .default("/"),
            ConfigItem::new("force_path_style", "bool")
                .title("强制路径风格")
                .help("MinIO等需要开启此选项")
                .default("false"),
            ConfigItem::new("request_timeout_secs", "number")
                .title("请求超时")
                .help("单次请求超时（秒），0表示不限制")
                .default("0"),
            ConfigItem::new("part_size", "number")
                .title("分片大小")
                .help("分片上传的分片大小（字节），最小5MB")
                .default("5242880"),
            ConfigItem::new("download_chunk_size", "number")
                .title("下载块大小")
                .help("分块下载的块大小（字节）")
                .default("8388608"),
            ConfigItem::new("download_concurrency", "number")
                .title("下载并发数")
                .default("8"),
            ConfigItem::new("download_timeout_secs", "number")
                .title("分块下载超时")
                .help("单个分块的下载超时（秒），0表示不限制")
                .default("60"),
            ConfigItem::new("delete_concurrency", "number")
                .title("删除并发数")
                .help("递归删除目录时的并发数")
                .default("8"),
        ]
    }

    fn create_driver(&self, config: Value) -> StorageResult<Box<dyn StorageDriver>> {
        let config: S3Config = serde_json::from_value(config)
            .map_err(|e| StorageError::InvalidConfig(format!("配置解析失败: {}", e)))?;
        Ok(Box::new(S3Driver::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_items_cover_config_fields() {
        let factory = S3DriverFactory;
        let names: Vec<String> = factory.additional_items().into_iter().map(|i| i.name).collect();
        let config = serde_json::to_value(S3Config::default()).unwrap();
        for field in config.as_object().unwrap().keys() {
            assert!(names.contains(field), "missing config item: {}", field);
        }
        let common: Vec<String> = factory.driver_info().common.into_iter().map(|i| i.name).collect();
        assert_eq!(common, vec!["mount_path".to_string()]);
    }

    #[test]
    fn test_create_driver_from_json() {
        let factory = S3DriverFactory;
        let driver = factory
            .create_driver(json!({
                "bucket": "media",
                "endpoint": "http://localhost:9000",
                "access_key_id": "ak",
                "secret_access_key": "sk",
                "force_path_style": true
            }))
            .unwrap();
        assert_eq!(driver.name(), "S3");
        assert!(driver.capabilities().can_multipart_upload);
    }

    #[test]
    fn test_create_driver_rejects_bad_config() {
        let factory = S3DriverFactory;
        assert!(matches!(
            factory.create_driver(json!({ "endpoint": "http://localhost:9000" })),
            Err(StorageError::InvalidConfig(_))
        ));
        assert!(matches!(
            factory.create_driver(json!({ "bucket": "" })),
            Err(StorageError::InvalidConfig(_))
        ));
    }
}
