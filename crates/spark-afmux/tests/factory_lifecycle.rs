use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use spark_afaddr::UnixSocketAddress;
use spark_afmux::assigner::OpenPorts;
use spark_afmux::error::{BIND, CONNECT};
use spark_afmux::{
    CachingNamingResolver, ConventionalFactory, LocalPortAssigner, LocalTransport, MuxError, MuxSocketFactory,
    Naming, PeerCredentials, PortAssigner, PortAuthorityServer, PortPool, ServerEndpoint, ShutdownCoordinator,
    SocketLayout, SocketNaming, StaticNaming, TokioTransport,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

fn local_naming(registry_port: i32) -> (Arc<LocalPortAssigner>, Arc<dyn Naming>) {
    let assigner = Arc::new(LocalPortAssigner::new());
    let naming = Arc::new(StaticNaming::new(registry_port, Arc::clone(&assigner) as Arc<dyn PortAssigner>));
    (assigner, naming)
}

fn factory_in(dir: &Path) -> (Arc<LocalPortAssigner>, MuxSocketFactory) {
    let (assigner, naming) = local_naming(1099);
    let factory = MuxSocketFactory::builder(naming, dir).build().unwrap();
    (assigner, factory)
}

fn hash_of(factory: &MuxSocketFactory) -> u64 {
    let mut hasher = DefaultHasher::new();
    factory.hash(&mut hasher);
    hasher.finish()
}

/// 端口按 `dir/prefix + port + suffix` 映射为套接字文件。
///
/// # 教案式说明
/// - **测试目标（Why）**：锁定文件命名规则，远程调用双方依赖同一映射才能互相找到；
/// - **验收契约（What）**：`/tmp/d`、前缀为空、后缀 `.sock`、端口 42 得到 `/tmp/d/42.sock`。
#[test]
fn socket_file_is_resolved_from_port() {
    let (_, naming) = local_naming(1099);
    let factory = MuxSocketFactory::builder(naming, "/tmp/d")
        .prefix("")
        .suffix(".sock")
        .build()
        .unwrap();
    assert_eq!(factory.file_for(42), PathBuf::from("/tmp/d/42.sock"));
    assert_eq!(factory.socket_dir(), Path::new("/tmp/d"));
}

/// 同一目录上的工厂相等且哈希一致，不同目录则不相等。
#[test]
fn factories_compare_by_directory() {
    let (_, first_naming) = local_naming(1099);
    let (_, second_naming) = local_naming(2000);
    let a = MuxSocketFactory::builder(first_naming, "/tmp/afmux-eq").build().unwrap();
    let b = MuxSocketFactory::builder(second_naming, "/tmp/afmux-eq")
        .suffix(".sock")
        .build()
        .unwrap();
    let (_, third_naming) = local_naming(1099);
    let c = MuxSocketFactory::builder(third_naming, "/tmp/afmux-other").build().unwrap();

    assert_eq!(a, b);
    assert_eq!(hash_of(&a), hash_of(&b));
    assert_ne!(a, c);
}

/// 客户端连接后登记对端凭据，关闭后凭据与客户端登记一并移除。
///
/// # 教案式说明
/// - **测试设计（How）**：在临时目录绑定固定端口的服务端，客户端连入并往返一段数据；
/// - **验收契约（What）**：
///   1. 服务端端口登记在工厂中，套接字文件存在；
///   2. `(host, port)` 可查询到与端点一致的凭据；
///   3. 客户端关闭后凭据与客户端计数归零，重复关闭无副作用。
#[tokio::test(flavor = "multi_thread")]
async fn client_registers_and_releases_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let (_, factory) = factory_in(dir.path());
    let port = 100_001;

    let server = factory.create_server_endpoint(port).await.unwrap();
    assert!(server.is_multiplexed());
    assert!(factory.is_local_server(port));
    assert!(factory.has_socket_file(port).await);

    let echo = tokio::spawn(async move {
        let mut connection = server.accept().await.unwrap();
        let mut buf = [0u8; 5];
        connection.read_exact(&mut buf).await.unwrap();
        connection.write_all(&buf).await.unwrap();
        server
    });

    let mut client = factory.create_client_endpoint("localhost", port).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let mut reply = [0u8; 5];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"hello");

    let stream = client.into_multiplexed().unwrap();
    let credentials = factory.peer_credentials_for("localhost", port).unwrap();
    assert_eq!(credentials, stream.peer_credentials());
    assert_eq!(stream.port(), port);
    assert_eq!(stream.socket_file(), factory.file_for(port));
    assert_eq!(factory.client_count(), 1);

    stream.close().unwrap();
    stream.close().unwrap();
    assert!(stream.is_closed());
    assert!(factory.peer_credentials_for("localhost", port).is_none());
    assert_eq!(factory.client_count(), 0);

    let server = echo.await.unwrap();
    server.close().await.unwrap();
    assert!(!factory.is_local_server(port));
    assert!(!factory.has_socket_file(port).await);
}

/// 匿名端口从权威处分配，关闭后归还，`open_ports` 可观察到变化。
#[tokio::test(flavor = "multi_thread")]
async fn anonymous_port_is_returned_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let (assigner, factory) = factory_in(dir.path());

    let listener = factory
        .create_server_endpoint(0)
        .await
        .unwrap()
        .into_multiplexed()
        .unwrap();
    let port = listener.port();
    assert!(port >= spark_afmux::ports::ANONYMOUS_PORT_BASE);
    assert!(factory.is_local_server(port));
    assert!(assigner.open_ports().await.unwrap().contains(port));

    listener.close().await.unwrap();
    let open: OpenPorts = assigner.open_ports().await.unwrap();
    assert!(!open.contains(port));
    assert!(!factory.has_socket_file(port).await);
}

/// 工厂关闭时，挂起的 `accept` 以可区分的“已关闭”错误返回。
#[tokio::test(flavor = "multi_thread")]
async fn close_unblocks_pending_accept() {
    let dir = tempfile::tempdir().unwrap();
    let (_, factory) = factory_in(dir.path());
    let listener = Arc::new(
        factory
            .create_server_endpoint(100_002)
            .await
            .unwrap()
            .into_multiplexed()
            .unwrap(),
    );

    let waiting = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };
    tokio::task::yield_now().await;

    factory.close().await.unwrap();
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(MuxError::Closed)));
    assert!(listener.is_closed());
    assert!(matches!(listener.accept().await, Err(MuxError::Closed)));
}

/// 低于基准的端口即便绑定在本地目录，也不算本工厂的多路复用服务端。
///
/// # 教案式说明
/// - **测试设计（How）**：不配置常规回退，端口 5 因此落在套接字目录中；
/// - **验收契约（What）**：端口 5 的服务端存活时 `is_local_server(5)` 仍为 `false`，
///   基准之上的端口照常为 `true`。
#[tokio::test(flavor = "multi_thread")]
async fn low_ports_are_never_local_servers() {
    let dir = tempfile::tempdir().unwrap();
    let (_, factory) = factory_in(dir.path());

    let low = factory.create_server_endpoint(5).await.unwrap();
    assert!(low.is_multiplexed());
    assert!(factory.has_socket_file(5).await);
    assert!(!factory.is_local_server(5));

    let high = factory.create_server_endpoint(100_010).await.unwrap();
    assert!(factory.is_local_server(100_010));

    low.close().await.unwrap();
    high.close().await.unwrap();
    assert!(!factory.is_local_server(100_010));
}

/// 同一端口被重新绑定后，关闭旧服务端不会删除新服务端的套接字文件。
///
/// # 教案式说明
/// - **验收契约（What）**：
///   1. 旧端点关闭后文件仍在，端口仍登记为本地服务端；
///   2. 客户端仍能连上新服务端；
///   3. 丢弃旧端点（同步关闭路径）同样保留文件。
#[tokio::test(flavor = "multi_thread")]
async fn rebound_socket_file_survives_old_close() {
    let dir = tempfile::tempdir().unwrap();
    let (_, factory) = factory_in(dir.path());
    let port = 100_050;

    let stale = factory.create_server_endpoint(port).await.unwrap();
    let live = factory.create_server_endpoint(port).await.unwrap();
    stale.close().await.unwrap();
    assert!(factory.has_socket_file(port).await);
    assert!(factory.is_local_server(port));

    let _client = factory.create_client_endpoint("localhost", port).await.unwrap();
    let _accepted = live.accept().await.unwrap();

    let dropped = factory.create_server_endpoint(port).await.unwrap();
    let current = factory.create_server_endpoint(port).await.unwrap();
    drop(dropped);
    assert!(factory.has_socket_file(port).await);
    let _second = factory.create_client_endpoint("localhost", port).await.unwrap();
    let _accepted = current.accept().await.unwrap();

    factory.close().await.unwrap();
    assert!(!factory.has_socket_file(port).await);
}

/// 工厂关闭时即便调用方仍持有监听端点，监听 fd 也被释放，未被接受的连接随之结束。
#[tokio::test(flavor = "multi_thread")]
async fn close_resets_unaccepted_connections() {
    let dir = tempfile::tempdir().unwrap();
    let (_, factory) = factory_in(dir.path());
    let port = 100_060;
    let listener = factory
        .create_server_endpoint(port)
        .await
        .unwrap()
        .into_multiplexed()
        .unwrap();

    let mut pending = UnixStream::connect(factory.file_for(port)).await.unwrap();
    factory.close().await.unwrap();
    assert!(listener.is_closed());
    assert!(matches!(listener.accept().await, Err(MuxError::Closed)));

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(std::time::Duration::from_secs(5), pending.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(UnixStream::connect(factory.file_for(port)).await.is_err());
}

/// 客户端读取进行中时关闭工厂，读取以 EOF 或错误结束而非一直挂起。
#[tokio::test(flavor = "multi_thread")]
async fn close_interrupts_in_flight_client_read() {
    let dir = tempfile::tempdir().unwrap();
    let (_, factory) = factory_in(dir.path());
    let port = 100_070;
    let server = factory.create_server_endpoint(port).await.unwrap();
    let mut client = factory.create_client_endpoint("localhost", port).await.unwrap();
    let _accepted = server.accept().await.unwrap();

    let reading = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        client.read(&mut buf).await
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    factory.close().await.unwrap();
    let read = tokio::time::timeout(std::time::Duration::from_secs(5), reading)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(factory.client_count(), 0);
}

/// 重复关闭工厂是安全的：第二次面对空登记表且不报错。
#[tokio::test(flavor = "multi_thread")]
async fn closing_twice_is_safe() {
    let dir = tempfile::tempdir().unwrap();
    let (_, factory) = factory_in(dir.path());
    let server = factory.create_server_endpoint(100_003).await.unwrap();
    let client = factory.create_client_endpoint("localhost", 100_003).await.unwrap();
    let _accepted = server.accept().await.unwrap();

    factory.close().await.unwrap();
    assert!(factory.server_ports().is_empty());
    assert_eq!(factory.client_count(), 0);
    assert!(client.as_multiplexed().unwrap().is_closed());
    assert!(factory.peer_credentials_for("localhost", 100_003).is_none());

    factory.close().await.unwrap();
    assert!(!factory.has_socket_file(100_003).await);
}

/// 外部记录往返：目录、前后缀与常规回退得以保留，命名上下文重新解析。
#[tokio::test(flavor = "multi_thread")]
async fn record_round_trip_restores_factory() {
    let dir = tempfile::tempdir().unwrap();
    let (_, naming) = local_naming(1099);
    let factory = MuxSocketFactory::builder(naming, dir.path())
        .prefix("svc-")
        .suffix(".sock")
        .client_factory(ConventionalFactory::loopback())
        .build()
        .unwrap();
    let record = factory.to_record().unwrap();

    let resolver = CachingNamingResolver::new(|_, registry_port| {
        Ok(Arc::new(StaticNaming::new(registry_port, Arc::new(LocalPortAssigner::new()))) as Arc<dyn Naming>)
    });
    let restored = MuxSocketFactory::from_record(&record, &resolver).unwrap();
    assert_eq!(restored, factory);
    assert_eq!(restored.naming().registry_port(), 1099);
    assert_eq!(restored.file_for(100_010), dir.path().join("svc-100010.sock"));
    assert_eq!(restored.to_record().unwrap(), record);
    assert!(resolver.cached(dir.path()).is_some());

    assert!(MuxSocketFactory::from_record(&record[..record.len() - 1], &resolver).is_err());
}

/// 协调器只弱引用工厂：退出时关闭存活工厂，丢弃的工厂被清理。
#[tokio::test(flavor = "multi_thread")]
async fn coordinator_closes_live_factories_only() {
    let coordinator = ShutdownCoordinator::new();
    let live_dir = tempfile::tempdir().unwrap();
    let (_, naming) = local_naming(1099);
    let live = MuxSocketFactory::builder(naming, live_dir.path())
        .shutdown_coordinator(Arc::clone(&coordinator))
        .build()
        .unwrap();
    let (_, naming) = local_naming(1099);
    let dropped = MuxSocketFactory::builder(naming, "/tmp/afmux-dropped")
        .shutdown_coordinator(Arc::clone(&coordinator))
        .build()
        .unwrap();
    assert_eq!(coordinator.live_hooks(), 2);
    drop(dropped);
    assert_eq!(coordinator.live_hooks(), 1);

    let server = live.create_server_endpoint(100_004).await.unwrap();
    let report = coordinator.shutdown().await;
    assert_eq!(report.records().len(), 1);
    assert_eq!(report.failures(), 0);
    assert!(server.as_multiplexed().unwrap().is_closed());
    assert!(!live.has_socket_file(100_004).await);

    let explicit = {
        let (_, naming) = local_naming(1099);
        MuxSocketFactory::builder(naming, "/tmp/afmux-explicit")
            .shutdown_coordinator(Arc::clone(&coordinator))
            .build()
            .unwrap()
    };
    assert_eq!(coordinator.live_hooks(), 1);
    explicit.close().await.unwrap();
    assert_eq!(coordinator.live_hooks(), 0);
}

/// 归还端口失败的端口权威。
#[derive(Debug)]
struct FailingReturns {
    next: AtomicI32,
    unavailable: bool,
}

impl FailingReturns {
    fn new(unavailable: bool) -> Self {
        Self {
            next: AtomicI32::new(spark_afmux::ports::ANONYMOUS_PORT_BASE),
            unavailable,
        }
    }
}

#[async_trait]
impl PortAssigner for FailingReturns {
    async fn new_port(&self) -> Result<i32, MuxError> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }

    async fn return_port(&self, port: i32) -> Result<(), MuxError> {
        if self.unavailable {
            Err(MuxError::Unavailable(format!("authority gone while returning {port}")))
        } else {
            Err(MuxError::Io {
                op: CONNECT,
                source: io::Error::from(io::ErrorKind::BrokenPipe),
            })
        }
    }

    async fn open_ports(&self) -> Result<OpenPorts, MuxError> {
        Err(MuxError::Unsupported("enumeration"))
    }
}

/// 关闭多个服务端出错时，首个错误对外，其余挂在 `suppressed` 上。
#[tokio::test(flavor = "multi_thread")]
async fn close_aggregates_server_failures() {
    let dir = tempfile::tempdir().unwrap();
    let naming = Arc::new(StaticNaming::new(1099, Arc::new(FailingReturns::new(false))));
    let factory = MuxSocketFactory::builder(naming, dir.path()).build().unwrap();
    let _first = factory.create_server_endpoint(0).await.unwrap();
    let _second = factory.create_server_endpoint(0).await.unwrap();
    assert_eq!(factory.server_ports().len(), 2);

    match factory.close().await.unwrap_err() {
        MuxError::Shutdown { first, suppressed } => {
            assert_eq!(first.code(), "spark.afmux.connect_failed");
            assert_eq!(suppressed.len(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(factory.server_ports().is_empty());
    factory.close().await.unwrap();
}

/// 关闭期间端口权威不可达被忽略。
#[tokio::test(flavor = "multi_thread")]
async fn close_ignores_unavailable_authority() {
    let dir = tempfile::tempdir().unwrap();
    let naming = Arc::new(StaticNaming::new(1099, Arc::new(FailingReturns::new(true))));
    let factory = MuxSocketFactory::builder(naming, dir.path()).build().unwrap();
    let _server = factory.create_server_endpoint(0).await.unwrap();
    factory.close().await.unwrap();
}

/// 绑定总是失败的传输，用于验证失败路径上的端口归还。
#[derive(Debug)]
struct RefusingBind;

#[async_trait]
impl LocalTransport for RefusingBind {
    async fn connect(&self, address: &UnixSocketAddress) -> Result<UnixStream, MuxError> {
        TokioTransport.connect(address).await
    }

    async fn bind(&self, _address: &UnixSocketAddress, _reuse: bool) -> Result<UnixListener, MuxError> {
        Err(MuxError::Io {
            op: BIND,
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        })
    }

    fn peer_credentials(&self, stream: &UnixStream) -> Result<PeerCredentials, MuxError> {
        TokioTransport.peer_credentials(stream)
    }
}

/// 匿名端口绑定失败时端口被归还给权威。
#[tokio::test(flavor = "multi_thread")]
async fn failed_anonymous_bind_returns_port() {
    let dir = tempfile::tempdir().unwrap();
    let (assigner, naming) = local_naming(1099);
    let factory = MuxSocketFactory::builder(naming, dir.path())
        .transport(Arc::new(RefusingBind))
        .build()
        .unwrap();

    let err = factory.create_server_endpoint(0).await.unwrap_err();
    assert_eq!(err.code(), "spark.afmux.bind_failed");
    assert!(assigner.open_ports().await.unwrap().is_empty());
    assert!(factory.server_ports().is_empty());
}

/// 普通文件模式：所有端口映射到同一套接字文件。
#[tokio::test(flavor = "multi_thread")]
async fn plain_file_mode_uses_directory_path() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("app.sock");
    let (_, naming) = local_naming(spark_afmux::ports::PLAIN_FILE_SOCKET);
    let factory = MuxSocketFactory::builder(naming, &socket).build().unwrap();
    assert!(factory.layout().is_plain_file());
    assert_eq!(factory.file_for(100_005), socket);
    assert_eq!(factory.to_string(), format!("MuxSocketFactory[path={}]", socket.display()));

    let server = factory.create_server_endpoint(100_005).await.unwrap();
    assert!(socket.exists());
    let _client = factory.create_client_endpoint("localhost", 123_456).await.unwrap();
    let _accepted = server.accept().await.unwrap();
    factory.close().await.unwrap();
    assert!(!socket.exists());
}

/// 低端口在配置了常规回退时走 TCP。
#[tokio::test(flavor = "multi_thread")]
async fn low_ports_use_conventional_factories() {
    let dir = tempfile::tempdir().unwrap();
    let (_, naming) = local_naming(1099);
    let factory = MuxSocketFactory::builder(naming, dir.path())
        .client_factory(ConventionalFactory::loopback())
        .server_factory(ConventionalFactory::loopback())
        .build()
        .unwrap();

    let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = i32::from(tcp.local_addr().unwrap().port());
    let client = factory.create_client_endpoint("127.0.0.1", port).await.unwrap();
    assert!(!client.is_multiplexed());
    assert!(factory.peer_credentials_for("127.0.0.1", port).is_none());
    drop(tcp);

    let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let free_port = i32::from(free.local_addr().unwrap().port());
    drop(free);
    let server = factory.create_server_endpoint(free_port).await.unwrap();
    assert!(matches!(server, ServerEndpoint::Conventional(_)));
    assert_eq!(server.port().unwrap(), free_port);
    assert!(!factory.is_local_server(free_port));
}

/// 远程端口权威：工厂经注册表端口对应的套接字文件分配与归还端口。
///
/// # 教案式说明
/// - **测试设计（How）**：在工厂目录中启动 [`PortAuthorityServer`]，工厂使用 [`SocketNaming`]；
/// - **验收契约（What）**：
///   1. 权威未启动时匿名绑定报告不可达；
///   2. 启动后分配到的端口出现在池中，关闭服务端后从池中消失。
#[tokio::test(flavor = "multi_thread")]
async fn remote_authority_serves_anonymous_ports() {
    let dir = tempfile::tempdir().unwrap();
    let layout = SocketLayout::new(dir.path(), "", ".rmi", 1099).unwrap();
    let naming = Arc::new(SocketNaming::for_layout(&layout, 1099));
    let factory = MuxSocketFactory::builder(naming, dir.path()).build().unwrap();

    let err = factory.create_server_endpoint(0).await.unwrap_err();
    assert!(err.is_unavailable());

    let pool = Arc::new(PortPool::new());
    let authority = PortAuthorityServer::spawn(factory.file_for(1099), Arc::clone(&pool))
        .await
        .unwrap();
    let listener = factory
        .create_server_endpoint(0)
        .await
        .unwrap()
        .into_multiplexed()
        .unwrap();
    let port = listener.port();
    assert!(pool.snapshot().unwrap().contains(port));

    listener.close().await.unwrap();
    assert!(!pool.snapshot().unwrap().contains(port));

    authority.shutdown().await.unwrap();
    factory.close().await.unwrap();
}
