//! 多路复用套接字工厂。
//!
//! # 教案式导航
//! - **定位（Where）**：远程调用运行时通过 [`MuxSocketFactory`] 创建客户端/服务端端点，
//!   所有服务共享同一个套接字目录，以数值端口区分；
//! - **动机（Why）**：本地套接字没有端口概念，工厂把端口映射为目录下的文件，
//!   并负责匿名端口的分配与归还、对端凭据缓存以及统一关闭；
//! - **做法（How）**：
//!   1. 端口低于 `AF_PORT_BASE` 且配置了常规回退时直接交给 TCP；
//!   2. 其余端口映射为 `dir/prefix + port + suffix`，经 [`LocalTransport`] 连接或绑定；
//!   3. 端点与工厂共享登记表，关闭任一侧都会同步注销；
//!   4. 同一目录的工厂共用一把异步“域锁”，串行化端口权威查找与关闭。

use core::fmt;
use core::hash::{Hash, Hasher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use spark_afaddr::UnixSocketAddress;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::assigner::PortAssigner;
use crate::config::MuxConfig;
use crate::conventional::ConventionalFactory;
use crate::credentials::{HostAndPort, PeerCredentials};
use crate::endpoint::{
    ClientEndpoint, ClientRelease, ListenerShared, MuxListener, MuxStream, ServerEndpoint, ServerRelease,
    SocketFile, StreamShared,
};
use crate::error::{MuxError, aggregate};
use crate::layout::{DEFAULT_PREFIX, DEFAULT_SUFFIX, SocketLayout};
use crate::naming::{Naming, NamingResolver, SocketNaming};
use crate::ports::{ANONYMOUS_PORT, is_multiplexed};
use crate::record::FactoryRecord;
use crate::registry::Registries;
use crate::shutdown::{HookId, ShutdownCoordinator, ShutdownHook};
use crate::transport::{LocalTransport, TokioTransport};

type DomainLocks = Mutex<HashMap<PathBuf, Weak<AsyncMutex<()>>>>;

static DOMAIN_LOCKS: OnceLock<DomainLocks> = OnceLock::new();

/// 取得目录对应的域锁；无人持有的条目顺带清理。
fn domain_lock(dir: &Path) -> Arc<AsyncMutex<()>> {
    let mut locks = DOMAIN_LOCKS.get_or_init(Default::default).lock();
    locks.retain(|_, lock| lock.strong_count() > 0);
    if let Some(existing) = locks.get(dir).and_then(Weak::upgrade) {
        return existing;
    }
    let lock = Arc::new(AsyncMutex::new(()));
    locks.insert(dir.to_path_buf(), Arc::downgrade(&lock));
    lock
}

/// 多路复用套接字工厂。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 克隆得到的句柄共享同一组登记表；
/// - 相等性与哈希只看套接字目录：同一目录上的两个工厂视为相等；
/// - [`MuxSocketFactory::close`] 幂等，第二次关闭面对空登记表，不产生错误；
/// - 关闭期间端口权威不可达（[`MuxError::Unavailable`]）被忽略，其余服务端关闭错误
///   以“首个对外、其余抑制”的方式返回，客户端关闭错误只记录日志。
///
/// ## 风险提示（Trade-offs）
/// - 忽略 `Unavailable` 的范围较宽：任何服务端关闭中出现的此类错误都会被吞掉，
///   调用方若需感知，应在关闭前自行检查端口权威。
#[derive(Clone, Debug)]
pub struct MuxSocketFactory {
    inner: Arc<FactoryInner>,
}

#[derive(Debug)]
struct FactoryInner {
    layout: SocketLayout,
    naming: Arc<dyn Naming>,
    client_factory: Option<ConventionalFactory>,
    server_factory: Option<ConventionalFactory>,
    transport: Arc<dyn LocalTransport>,
    registries: Arc<Registries>,
    domain: Arc<AsyncMutex<()>>,
    authority: Mutex<Option<Arc<dyn PortAssigner>>>,
    registration: Mutex<Option<(Arc<ShutdownCoordinator>, HookId)>>,
}

/// [`MuxSocketFactory`] 的构造器。
#[derive(Debug)]
pub struct MuxSocketFactoryBuilder {
    naming: Arc<dyn Naming>,
    dir: PathBuf,
    prefix: String,
    suffix: String,
    client_factory: Option<ConventionalFactory>,
    server_factory: Option<ConventionalFactory>,
    transport: Arc<dyn LocalTransport>,
    coordinator: Option<Arc<ShutdownCoordinator>>,
}

impl MuxSocketFactoryBuilder {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn client_factory(mut self, factory: ConventionalFactory) -> Self {
        self.client_factory = Some(factory);
        self
    }

    pub fn server_factory(mut self, factory: ConventionalFactory) -> Self {
        self.server_factory = Some(factory);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn LocalTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// 构造时把工厂以弱引用登记到协调器。
    pub fn shutdown_coordinator(mut self, coordinator: Arc<ShutdownCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn build(self) -> Result<MuxSocketFactory, MuxError> {
        let layout = SocketLayout::new(self.dir, self.prefix, self.suffix, self.naming.registry_port())?;
        let domain = domain_lock(layout.dir());
        let inner = Arc::new(FactoryInner {
            layout,
            naming: self.naming,
            client_factory: self.client_factory,
            server_factory: self.server_factory,
            transport: self.transport,
            registries: Arc::new(Registries::default()),
            domain,
            authority: Mutex::new(None),
            registration: Mutex::new(None),
        });
        if let Some(coordinator) = self.coordinator {
            let hook = Arc::downgrade(&inner) as Weak<dyn ShutdownHook>;
            let id = coordinator.register(hook);
            *inner.registration.lock() = Some((coordinator, id));
        }
        debug!(factory = %inner.layout, "multiplexing factory created");
        Ok(MuxSocketFactory { inner })
    }
}

impl MuxSocketFactory {
    pub fn builder(naming: Arc<dyn Naming>, dir: impl Into<PathBuf>) -> MuxSocketFactoryBuilder {
        MuxSocketFactoryBuilder {
            naming,
            dir: dir.into(),
            prefix: DEFAULT_PREFIX.to_owned(),
            suffix: DEFAULT_SUFFIX.to_owned(),
            client_factory: None,
            server_factory: None,
            transport: Arc::new(TokioTransport),
            coordinator: None,
        }
    }

    /// 按配置构造；端口权威位于注册表端口对应的套接字文件。
    pub fn from_config(config: &MuxConfig) -> Result<Self, MuxError> {
        let layout = config.layout()?;
        let naming: Arc<dyn Naming> = Arc::new(SocketNaming::for_layout(&layout, config.registry_port));
        let mut builder = Self::builder(naming, config.socket_dir.clone())
            .prefix(config.prefix.clone())
            .suffix(config.suffix.clone());
        if let Some(conventional) = config.conventional() {
            builder = builder
                .client_factory(conventional.clone())
                .server_factory(conventional);
        }
        builder.build()
    }

    /// 由外部记录恢复构造器，命名上下文经 `resolver` 重新解析。
    pub fn builder_from_record(
        record: &[u8],
        resolver: &dyn NamingResolver,
    ) -> Result<MuxSocketFactoryBuilder, MuxError> {
        let record = FactoryRecord::decode(record)?;
        let naming = resolver.resolve(&record.socket_dir, record.registry_port)?;
        let mut builder = Self::builder(naming, record.socket_dir)
            .prefix(record.prefix)
            .suffix(record.suffix);
        builder.client_factory = record.client_factory;
        builder.server_factory = record.server_factory;
        Ok(builder)
    }

    pub fn from_record(record: &[u8], resolver: &dyn NamingResolver) -> Result<Self, MuxError> {
        Self::builder_from_record(record, resolver)?.build()
    }

    /// 编码外部记录；目录以绝对路径写出。
    pub fn to_record(&self) -> Result<Bytes, MuxError> {
        let inner = &self.inner;
        let socket_dir = std::path::absolute(inner.layout.dir())
            .map_err(|err| MuxError::Record(format!("cannot resolve socket directory: {err}")))?;
        FactoryRecord {
            socket_dir,
            registry_port: inner.naming.registry_port(),
            client_factory: inner.client_factory.clone(),
            server_factory: inner.server_factory.clone(),
            prefix: inner.layout.prefix().to_owned(),
            suffix: inner.layout.suffix().to_owned(),
        }
        .encode()
    }

    pub fn layout(&self) -> &SocketLayout {
        &self.inner.layout
    }

    pub fn naming(&self) -> &Arc<dyn Naming> {
        &self.inner.naming
    }

    pub fn socket_dir(&self) -> &Path {
        self.inner.layout.dir()
    }

    pub fn file_for(&self, port: i32) -> PathBuf {
        self.inner.layout.file_for(port)
    }

    /// 端口对应的套接字文件当前是否存在。
    pub async fn has_socket_file(&self, port: i32) -> bool {
        tokio::fs::try_exists(self.file_for(port)).await.unwrap_or(false)
    }

    /// 该端口是否有本工厂登记的存活多路复用服务端；低于基准的端口一律返回 `false`。
    pub fn is_local_server(&self, port: i32) -> bool {
        is_multiplexed(port) && self.inner.registries.has_server(port)
    }

    pub fn server_ports(&self) -> Vec<i32> {
        self.inner.registries.server_ports()
    }

    pub fn client_count(&self) -> usize {
        self.inner.registries.client_count()
    }

    /// 以 `(host, port)` 查询最近一次连接记录的对端凭据。
    pub fn peer_credentials_for(&self, host: &str, port: i32) -> Option<PeerCredentials> {
        self.inner
            .registries
            .credentials
            .get(&HostAndPort::new(host, port))
    }

    /// 端口权威；首次查找结果在下一次关闭前被缓存。
    pub async fn port_assigner(&self) -> Result<Arc<dyn PortAssigner>, MuxError> {
        self.inner.port_assigner().await
    }

    pub async fn create_client_endpoint(&self, host: &str, port: i32) -> Result<ClientEndpoint, MuxError> {
        let inner = &self.inner;
        if !is_multiplexed(port)
            && let Some(conventional) = &inner.client_factory
        {
            return conventional.connect(host, port).await.map(ClientEndpoint::Conventional);
        }

        let file = inner.layout.file_for(port);
        let address = UnixSocketAddress::of_path(&file, port)?;
        let stream = inner.transport.connect(&address).await?;
        let credentials = inner.transport.peer_credentials(&stream)?;
        let key = HostAndPort::new(host, port);
        inner.registries.credentials.insert(key.clone(), credentials);

        let release = ClientRelease {
            registries: Arc::downgrade(&inner.registries),
            key: key.clone(),
        };
        let shared = match StreamShared::new(&stream, release) {
            Ok(shared) => shared,
            Err(err) => {
                inner.registries.credentials.remove(&key);
                return Err(err);
            }
        };
        inner.registries.register_client(Arc::clone(&shared));
        Ok(ClientEndpoint::Multiplexed(MuxStream::new(
            stream,
            shared,
            key,
            credentials,
            file,
        )))
    }

    pub async fn create_server_endpoint(&self, port: i32) -> Result<ServerEndpoint, MuxError> {
        let inner = &self.inner;
        if port == ANONYMOUS_PORT {
            let assigner = inner.port_assigner().await?;
            let port = assigner.new_port().await?;
            return match inner
                .bind_multiplexed(port, Some(Arc::clone(&assigner)), is_multiplexed(port))
                .await
            {
                Ok(listener) => Ok(ServerEndpoint::Multiplexed(listener)),
                Err(err) => {
                    if let Err(return_err) = assigner.return_port(port).await {
                        warn!(port, error = %return_err, "anonymous port not returned after bind failure");
                    }
                    Err(err)
                }
            };
        }

        if !is_multiplexed(port)
            && let Some(conventional) = &inner.server_factory
        {
            return conventional.bind(port).await.map(ServerEndpoint::Conventional);
        }
        inner
            .bind_multiplexed(port, None, true)
            .await
            .map(ServerEndpoint::Multiplexed)
    }

    pub async fn close(&self) -> Result<(), MuxError> {
        self.inner.close().await
    }
}

impl FactoryInner {
    async fn port_assigner(&self) -> Result<Arc<dyn PortAssigner>, MuxError> {
        let _domain = self.domain.lock().await;
        let cached = self.authority.lock().clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        let assigner = self.naming.port_assigner().await?;
        *self.authority.lock() = Some(Arc::clone(&assigner));
        Ok(assigner)
    }

    async fn bind_multiplexed(
        &self,
        port: i32,
        return_to: Option<Arc<dyn PortAssigner>>,
        register: bool,
    ) -> Result<MuxListener, MuxError> {
        let file = self.layout.file_for(port);
        let address = UnixSocketAddress::of_path(&file, port)?;
        let listener = self.transport.bind(&address, true).await?;
        let socket_file = match SocketFile::capture(file.clone()).await {
            Ok(socket_file) => Some(socket_file),
            Err(err) => {
                warn!(port, file = %file.display(), error = %err, "bound socket file not found, left on close");
                None
            }
        };
        let release = ServerRelease {
            registries: Arc::downgrade(&self.registries),
            registered: register,
            return_to,
        };
        let shared = ListenerShared::new(port, listener, socket_file, release);
        if register {
            self.registries.register_server(port, Arc::clone(&shared));
        }
        debug!(port, file = %file.display(), "server endpoint bound");
        Ok(MuxListener::new(shared, file))
    }

    async fn close(&self) -> Result<(), MuxError> {
        let _domain = self.domain.lock().await;
        self.registries.credentials.clear();
        self.authority.lock().take();

        let mut errors = Vec::new();
        let servers = self.registries.drain_servers();
        let server_count = servers.len();
        for server in servers {
            match server.close().await {
                Ok(()) => {}
                Err(err) if err.is_unavailable() => {
                    debug!(port = server.port(), error = %err, "port authority unavailable during close");
                }
                Err(err) => errors.push(err),
            }
        }

        let clients = self.registries.drain_clients();
        let client_count = clients.len();
        for client in clients {
            if let Err(err) = client.close() {
                warn!(client = client.id(), error = %err, "client close failed");
            }
        }

        let registration = self.registration.lock().take();
        if let Some((coordinator, id)) = registration {
            coordinator.deregister(id);
        }
        info!(
            factory = %self.layout,
            servers = server_count,
            clients = client_count,
            failed = errors.len(),
            "multiplexing factory closed"
        );
        aggregate(errors)
    }
}

impl Drop for FactoryInner {
    fn drop(&mut self) {
        if let Some((coordinator, id)) = self.registration.get_mut().take() {
            coordinator.deregister(id);
        }
    }
}

#[async_trait]
impl ShutdownHook for FactoryInner {
    fn label(&self) -> String {
        format!("afmux:{}", self.layout.dir().display())
    }

    async fn on_shutdown(&self) -> Result<(), MuxError> {
        self.close().await
    }
}

impl PartialEq for MuxSocketFactory {
    fn eq(&self, other: &Self) -> bool {
        self.inner.layout.dir() == other.inner.layout.dir()
    }
}

impl Eq for MuxSocketFactory {}

impl Hash for MuxSocketFactory {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.layout.dir().hash(state);
    }
}

impl fmt::Display for MuxSocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MuxSocketFactory[{}]", self.inner.layout)
    }
}
