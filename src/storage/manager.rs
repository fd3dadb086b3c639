use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::{get_common_items, ConfigItem, DriverConfig, DriverInfo, StorageDriver, StorageError, StorageResult};
use crate::utils::fix_and_clean_path;

pub type DriverBox = Arc<Box<dyn StorageDriver>>;

/// Driver factory trait / 驱动工厂 trait
pub trait DriverFactory: Send + Sync {
    /// Driver type name / 驱动类型名称
    fn driver_type(&self) -> &'static str;

    /// 创建驱动实例
    fn create_driver(&self, config: Value) -> StorageResult<Box<dyn StorageDriver>>;

    /// Return driver basic config / 返回驱动基本配置
    fn driver_config(&self) -> DriverConfig;

    /// Return driver specific config items / 返回驱动特有配置项
    fn additional_items(&self) -> Vec<ConfigItem>;

    /// Generate complete driver info (auto merge common + additional) / 生成完整的驱动信息
    fn driver_info(&self) -> DriverInfo {
        DriverInfo {
            common: get_common_items(),
            additional: self.additional_items(),
            config: self.driver_config(),
        }
    }
}

/// Storage manager: mount table of driver instances / 存储管理器
///
/// Drivers are keyed by their mount path.
#[derive(Clone, Default)]
pub struct StorageManager {
    drivers: Arc<RwLock<HashMap<String, DriverBox>>>,
    factories: Arc<RwLock<HashMap<String, Arc<Box<dyn DriverFactory>>>>>,
    /// Driver error status (mount path -> error message) / 驱动错误状态
    driver_errors: Arc<RwLock<HashMap<String, String>>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register driver factory / 注册驱动工厂
    pub async fn register_factory(&self, factory: Box<dyn DriverFactory>) -> StorageResult<()> {
        let driver_type = factory.driver_type().to_string();
        self.factories.write().await.insert(driver_type.clone(), Arc::new(factory));
        tracing::info!("Driver factory registered: {}", driver_type);
        Ok(())
    }

    /// Create and mount a driver (verify on success, record error on failure) / 创建并挂载驱动
    pub async fn create_driver(&self, mount_path: &str, driver_type: &str, config: Value) -> StorageResult<String> {
        let mount = fix_and_clean_path(mount_path);
        let factory = self
            .factories
            .read()
            .await
            .get(driver_type)
            .cloned()
            .ok_or_else(|| StorageError::InvalidConfig(format!("Driver type not found: {}", driver_type)))?;

        let driver = match factory.create_driver(config) {
            Ok(driver) => driver,
            Err(e) => {
                self.driver_errors.write().await.insert(mount.clone(), e.to_string());
                tracing::error!("Driver creation failed: {} ({}) - {}", mount, driver_type, e);
                return Err(e);
            }
        };

        let driver_box: DriverBox = Arc::new(driver);
        // Verify driver validity: try list root directory / 验证驱动有效性
        let validation = driver_box.list("/").await;
        self.drivers.write().await.insert(mount.clone(), driver_box);

        match validation {
            Ok(_) => {
                self.driver_errors.write().await.remove(&mount);
                tracing::info!("Driver created and verified: {} ({})", mount, driver_type);
            }
            Err(e) => {
                // 驱动仍然挂载，只记录错误
                self.driver_errors.write().await.insert(mount.clone(), e.to_string());
                tracing::warn!("Driver created but verification failed: {} ({}) - {}", mount, driver_type, e);
            }
        }
        Ok(mount)
    }

    /// Mount an already constructed driver / 挂载已构造的驱动
    pub async fn mount(&self, mount_path: &str, driver: Box<dyn StorageDriver>) -> String {
        let mount = fix_and_clean_path(mount_path);
        tracing::info!("Driver mounted: {} ({})", mount, driver.name());
        self.drivers.write().await.insert(mount.clone(), Arc::new(driver));
        mount
    }

    /// Get driver error status / 获取驱动错误状态
    pub async fn get_driver_error(&self, mount_path: &str) -> Option<String> {
        self.driver_errors.read().await.get(&fix_and_clean_path(mount_path)).cloned()
    }

    /// Get driver instance / 获取驱动实例
    pub async fn get_driver(&self, mount_path: &str) -> Option<DriverBox> {
        self.drivers.read().await.get(&fix_and_clean_path(mount_path)).cloned()
    }

    /// Remove driver instance / 移除驱动实例
    pub async fn remove_driver(&self, mount_path: &str) -> StorageResult<()> {
        let mount = fix_and_clean_path(mount_path);
        self.drivers
            .write()
            .await
            .remove(&mount)
            .ok_or_else(|| StorageError::NotFound(format!("Driver not found: {}", mount)))?;
        self.driver_errors.write().await.remove(&mount);
        tracing::info!("Driver removed: {}", mount);
        Ok(())
    }

    /// List all mount paths / 列出所有挂载点
    pub async fn list_drivers(&self) -> Vec<String> {
        let mut mounts: Vec<String> = self.drivers.read().await.keys().cloned().collect();
        mounts.sort();
        mounts
    }

    /// List all available driver types / 列出所有可用的驱动类型
    pub async fn list_driver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    /// Driver info of every registered factory / 所有驱动工厂的信息
    pub async fn driver_infos(&self) -> Vec<DriverInfo> {
        self.factories.read().await.values().map(|f| f.driver_info()).collect()
    }

    /// Resolve path to corresponding driver and relative path
    /// Returns (mount path, driver instance, relative path) / 根据路径解析到对应的驱动
    pub async fn resolve_path(&self, path: &str) -> Option<(String, DriverBox, String)> {
        let path = fix_and_clean_path(path);
        let drivers = self.drivers.read().await;

        // Find the longest matching mount point / 找到最长匹配的挂载点
        drivers
            .iter()
            .filter_map(|(mount, driver)| {
                let relative = if mount == "/" {
                    path.clone()
                } else if path == *mount {
                    "/".to_string()
                } else {
                    // 必须在路径分隔处匹配：/ab 不属于 /a
                    path.strip_prefix(mount.as_str())
                        .filter(|rest| rest.starts_with('/'))?
                        .to_string()
                };
                Some((mount.clone(), driver.clone(), relative))
            })
            .max_by_key(|(mount, _, _)| mount.len())
    }

    /// Copy a file between two mounted paths / 在两个挂载路径之间复制文件
    ///
    /// Within one mount this is a plain copy; across mounts the destination
    /// driver decides whether it can copy from the source (`copy_from`).
    pub async fn copy_across(&self, src_path: &str, dst_path: &str) -> StorageResult<()> {
        let (src_mount, src, src_rel) = self
            .resolve_path(src_path)
            .await
            .ok_or_else(|| StorageError::NotFound(format!("no mount for {}", src_path)))?;
        let (dst_mount, dst, dst_rel) = self
            .resolve_path(dst_path)
            .await
            .ok_or_else(|| StorageError::NotFound(format!("no mount for {}", dst_path)))?;

        tracing::debug!("copy_across: {}{} -> {}{}", src_mount, src_rel, dst_mount, dst_rel);
        if Arc::ptr_eq(&src, &dst) {
            dst.copy_item(&src_rel, &dst_rel).await
        } else {
            dst.copy_from(&**src, &src_rel, &dst_rel).await
        }
    }
}
