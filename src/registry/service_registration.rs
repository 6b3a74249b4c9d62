//! 服务注册守卫
//!
//! 注册成功后持有实例，`shutdown()` 时注销；未显式关闭时在 Drop 中尽力注销。

use std::sync::Arc;
use tracing::{info, warn};

use super::trait_def::Registrar;
use crate::discovery::ServiceInstance;
use crate::error::Result;

pub struct ServiceRegistration {
    registrar: Arc<dyn Registrar>,
    instance: ServiceInstance,
    registered: bool,
}

impl ServiceRegistration {
    /// 注册实例并返回守卫
    pub async fn register(registrar: Arc<dyn Registrar>, instance: ServiceInstance) -> Result<Self> {
        registrar.register(&instance).await?;
        Ok(Self {
            registrar,
            instance,
            registered: true,
        })
    }

    /// 获取服务实例
    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// 优雅关闭：注销实例
    ///
    /// 应该在服务关闭前显式调用，而不是依赖 Drop。重复调用直接返回。
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.registered {
            return Ok(());
        }
        self.registered = false;

        match self.registrar.deregister(&self.instance).await {
            Ok(()) => {
                info!(service = %self.instance.name, instance_id = %self.instance.id, "✅ Service unregistered");
                Ok(())
            }
            Err(e) => {
                warn!(
                    service = %self.instance.name,
                    instance_id = %self.instance.id,
                    error = %e,
                    "⚠️ Failed to unregister service"
                );
                Err(e)
            }
        }
    }
}

impl Drop for ServiceRegistration {
    fn drop(&mut self) {
        if !self.registered {
            return;
        }
        self.registered = false;

        // Drop 是同步的，只能交给当前 runtime
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let registrar = self.registrar.clone();
            let instance = self.instance.clone();
            handle.spawn(async move {
                match registrar.deregister(&instance).await {
                    Ok(()) => info!(
                        service = %instance.name,
                        instance_id = %instance.id,
                        "✅ Service unregistered (from Drop)"
                    ),
                    Err(e) => warn!(
                        service = %instance.name,
                        instance_id = %instance.id,
                        error = %e,
                        "⚠️ Failed to unregister service (from Drop)"
                    ),
                }
            });
        } else {
            warn!(
                service = %self.instance.name,
                instance_id = %self.instance.id,
                "⚠️ Cannot unregister service: tokio runtime not available"
            );
        }
    }
}
