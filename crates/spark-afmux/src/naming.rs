//! 命名上下文：注册表端口与端口权威的查找入口。
//!
//! # 教案式导航
//! - [`Naming`] 把“注册表端口是多少”“端口权威在哪里”两件事绑在一起，
//!   多路复用工厂只通过它获取 [`PortAssigner`]；
//! - [`NamingResolver`] 用于从外部记录恢复工厂时，根据目录与注册表端口重新得到 [`Naming`]。

use core::fmt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::assigner::{PortAssigner, RemotePortAssigner};
use crate::error::MuxError;
use crate::layout::SocketLayout;

/// 命名上下文。
#[async_trait]
pub trait Naming: Send + Sync + fmt::Debug {
    /// 注册表端口；`PLAIN_FILE_SOCKET` 表示普通文件模式。
    fn registry_port(&self) -> i32;

    /// 查找端口权威；权威不可达时返回 [`MuxError::Unavailable`]。
    async fn port_assigner(&self) -> Result<Arc<dyn PortAssigner>, MuxError>;
}

/// 直接持有端口权威实例的命名上下文，适合单进程部署与测试。
#[derive(Debug, Clone)]
pub struct StaticNaming {
    registry_port: i32,
    assigner: Arc<dyn PortAssigner>,
}

impl StaticNaming {
    pub fn new(registry_port: i32, assigner: Arc<dyn PortAssigner>) -> Self {
        Self {
            registry_port,
            assigner,
        }
    }
}

#[async_trait]
impl Naming for StaticNaming {
    fn registry_port(&self) -> i32 {
        self.registry_port
    }

    async fn port_assigner(&self) -> Result<Arc<dyn PortAssigner>, MuxError> {
        Ok(Arc::clone(&self.assigner))
    }
}

/// 通过本地套接字访问端口权威的命名上下文。
///
/// 权威套接字默认位于注册表端口对应的文件，即 `dir/prefix + registry_port + suffix`。
#[derive(Debug, Clone)]
pub struct SocketNaming {
    registry_port: i32,
    authority: PathBuf,
}

impl SocketNaming {
    pub fn new(registry_port: i32, authority: impl Into<PathBuf>) -> Self {
        Self {
            registry_port,
            authority: authority.into(),
        }
    }

    /// 权威位于布局中注册表端口对应的文件。
    pub fn for_layout(layout: &SocketLayout, registry_port: i32) -> Self {
        Self::new(registry_port, layout.file_for(registry_port))
    }

    pub fn authority_path(&self) -> &Path {
        &self.authority
    }
}

#[async_trait]
impl Naming for SocketNaming {
    fn registry_port(&self) -> i32 {
        self.registry_port
    }

    async fn port_assigner(&self) -> Result<Arc<dyn PortAssigner>, MuxError> {
        match tokio::fs::try_exists(&self.authority).await {
            Ok(true) => Ok(Arc::new(RemotePortAssigner::new(self.authority.clone()))),
            Ok(false) => Err(MuxError::Unavailable(format!(
                "no port authority at {}",
                self.authority.display()
            ))),
            Err(err) => Err(MuxError::Unavailable(format!(
                "{}: {err}",
                self.authority.display()
            ))),
        }
    }
}

/// 由目录与注册表端口恢复命名上下文。
pub trait NamingResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, socket_dir: &Path, registry_port: i32) -> Result<Arc<dyn Naming>, MuxError>;
}

type NamingFactory = dyn Fn(&Path, i32) -> Result<Arc<dyn Naming>, MuxError> + Send + Sync;

/// 按目录缓存命名上下文的解析器。
///
/// # 契约（What）
/// - 同一目录、同一注册表端口多次解析返回同一实例；
/// - 同一目录出现不同注册表端口时不报错，新实例替换缓存（后写覆盖），并记录调试日志。
pub struct CachingNamingResolver {
    factory: Box<NamingFactory>,
    cache: Mutex<HashMap<PathBuf, Arc<dyn Naming>>>,
}

impl CachingNamingResolver {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&Path, i32) -> Result<Arc<dyn Naming>, MuxError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 以 [`SocketNaming`] 解析，权威文件按给定前后缀定位。
    pub fn socket_naming(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let suffix = suffix.into();
        Self::new(move |dir, registry_port| {
            let layout = SocketLayout::new(dir, prefix.as_str(), suffix.as_str(), registry_port)?;
            Ok(Arc::new(SocketNaming::for_layout(&layout, registry_port)) as Arc<dyn Naming>)
        })
    }

    pub fn cached(&self, socket_dir: &Path) -> Option<Arc<dyn Naming>> {
        self.cache.lock().get(socket_dir).cloned()
    }
}

impl fmt::Debug for CachingNamingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingNamingResolver")
            .field("cached_dirs", &self.cache.lock().len())
            .finish_non_exhaustive()
    }
}

impl NamingResolver for CachingNamingResolver {
    fn resolve(&self, socket_dir: &Path, registry_port: i32) -> Result<Arc<dyn Naming>, MuxError> {
        if let Some(existing) = self.cached(socket_dir)
            && existing.registry_port() == registry_port
        {
            return Ok(existing);
        }
        let naming = (self.factory)(socket_dir, registry_port)?;
        let previous = self
            .cache
            .lock()
            .insert(socket_dir.to_path_buf(), Arc::clone(&naming));
        if let Some(previous) = previous {
            debug!(
                dir = %socket_dir.display(),
                previous = previous.registry_port(),
                current = registry_port,
                "registry port changed for socket directory"
            );
        }
        Ok(naming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assigner::LocalPortAssigner;

    #[tokio::test]
    async fn static_naming_hands_out_the_same_assigner() {
        let assigner: Arc<dyn PortAssigner> = Arc::new(LocalPortAssigner::new());
        let naming = StaticNaming::new(1099, Arc::clone(&assigner));
        let resolved = naming.port_assigner().await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &assigner));
        assert_eq!(naming.registry_port(), 1099);
    }

    #[tokio::test]
    async fn socket_naming_without_authority_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SocketLayout::new(dir.path(), "", ".rmi", 1099).unwrap();
        let naming = SocketNaming::for_layout(&layout, 1099);
        assert_eq!(naming.authority_path(), dir.path().join("1099.rmi"));
        assert!(naming.port_assigner().await.unwrap_err().is_unavailable());
    }

    #[test]
    fn resolver_caches_per_directory_and_tolerates_port_change() {
        let resolver = CachingNamingResolver::socket_naming("", ".rmi");
        let dir = Path::new("/tmp/afmux-resolver");
        let first = resolver.resolve(dir, 1099).unwrap();
        let again = resolver.resolve(dir, 1099).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let moved = resolver.resolve(dir, 2000).unwrap();
        assert_eq!(moved.registry_port(), 2000);
        assert_eq!(resolver.cached(dir).unwrap().registry_port(), 2000);
    }
}
