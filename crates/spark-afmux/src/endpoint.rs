//! 多路复用工厂产出的客户端/服务端端点。
//!
//! # 教案式导航
//! - **客户端**：[`MuxStream`] 包装 Tokio `UnixStream`，附带对端凭据；关闭或丢弃时从工厂登记表注销；
//! - **服务端**：[`MuxListener`] 包装 Tokio `UnixListener`，关闭时释放监听 fd、删除自己创建的套接字文件、注销端口，
//!   匿名端口还会归还给分配它的端口权威；
//! - **统一出口**：[`ClientEndpoint`]/[`ServerEndpoint`] 用枚举区分多路复用端点与常规 TCP 端点。
//!
//! 工厂关闭时需要从“外部”强制关闭端点，因此关闭状态与注销信息放在共享的
//! `StreamShared`/`ListenerShared` 中，端点与登记表各持一份 `Arc`。

use std::fs::Metadata;
use std::io::{self, IoSlice};
use std::net::Shutdown;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::assigner::PortAssigner;
use crate::credentials::{HostAndPort, PeerCredentials};
use crate::error::{self, MuxError, aggregate, map_io_error};
use crate::registry::Registries;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// 客户端注销信息。
#[derive(Debug)]
pub(crate) struct ClientRelease {
    pub registries: Weak<Registries>,
    pub key: HostAndPort,
}

/// 客户端端点与登记表共享的状态。
#[derive(Debug)]
pub(crate) struct StreamShared {
    id: u64,
    closed: AtomicBool,
    fd: OwnedFd,
    release: Mutex<Option<ClientRelease>>,
}

impl StreamShared {
    pub fn new(stream: &UnixStream, release: ClientRelease) -> Result<Arc<Self>, MuxError> {
        let fd = stream
            .as_fd()
            .try_clone_to_owned()
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        Ok(Arc::new(Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            closed: AtomicBool::new(false),
            fd,
            release: Mutex::new(Some(release)),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 关闭双向读写并注销；重复调用是空操作。
    pub fn close(&self) -> Result<(), MuxError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = match SockRef::from(&self.fd).shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(map_io_error(error::SHUTDOWN, err)),
        };
        let release = self.release.lock().take();
        if let Some(ClientRelease { registries, key }) = release
            && let Some(registries) = registries.upgrade()
        {
            registries.unregister_client(self.id, &key);
        }
        result
    }
}

/// 服务端注销信息。
pub(crate) struct ServerRelease {
    pub registries: Weak<Registries>,
    pub registered: bool,
    /// 匿名端口的签发者；关闭时把端口还给它。
    pub return_to: Option<Arc<dyn PortAssigner>>,
}

impl core::fmt::Debug for ServerRelease {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServerRelease")
            .field("registered", &self.registered)
            .field("returns_port", &self.return_to.is_some())
            .finish()
    }
}

/// 绑定时记录的套接字文件身份。
///
/// 同一路径可能被后来的绑定替换；关闭时只删除仍是自己创建的那个文件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SocketFile {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl SocketFile {
    /// 读取刚绑定的套接字文件的 `(dev, ino)`。
    pub async fn capture(path: PathBuf) -> io::Result<Self> {
        let meta = tokio::fs::symlink_metadata(&path).await?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
            path,
        })
    }

    fn is_same(&self, meta: &Metadata) -> bool {
        meta.dev() == self.dev && meta.ino() == self.ino
    }

    async fn remove(&self, port: i32) -> io::Result<()> {
        let removed = match tokio::fs::symlink_metadata(&self.path).await {
            Ok(meta) if self.is_same(&meta) => tokio::fs::remove_file(&self.path).await,
            Ok(_) => {
                debug!(port, path = %self.path.display(), "socket file rebound elsewhere, kept");
                Ok(())
            }
            Err(err) => Err(err),
        };
        removed.or_else(ignore_not_found)
    }

    fn remove_blocking(&self, port: i32) -> io::Result<()> {
        let removed = match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if self.is_same(&meta) => std::fs::remove_file(&self.path),
            Ok(_) => {
                debug!(port, path = %self.path.display(), "socket file rebound elsewhere, kept");
                Ok(())
            }
            Err(err) => Err(err),
        };
        removed.or_else(ignore_not_found)
    }
}

fn ignore_not_found(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}

/// 服务端端点与登记表共享的状态。
///
/// 监听套接字由共享状态持有：无论从端点还是从工厂关闭，监听 fd 都会随之释放，
/// 尚未被接受的入站连接因此收到复位。
#[derive(Debug)]
pub(crate) struct ListenerShared {
    port: i32,
    listener: Mutex<Option<Arc<UnixListener>>>,
    delete_on_close: Option<SocketFile>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    release: Mutex<Option<ServerRelease>>,
}

impl ListenerShared {
    pub fn new(
        port: i32,
        listener: UnixListener,
        delete_on_close: Option<SocketFile>,
        release: ServerRelease,
    ) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            port,
            listener: Mutex::new(Some(Arc::new(listener))),
            delete_on_close,
            closed: AtomicBool::new(false),
            closed_tx,
            release: Mutex::new(Some(release)),
        })
    }

    pub fn port(&self) -> i32 {
        self.port
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    fn listener(&self) -> Option<Arc<UnixListener>> {
        self.listener.lock().clone()
    }

    /// 标记关闭、唤醒挂起的 `accept` 并释放监听套接字。
    fn shut_listener(&self) {
        self.closed_tx.send_replace(true);
        let listener = self.listener.lock().take();
        drop(listener);
    }

    /// 关闭：释放监听套接字、删除自己创建的套接字文件、注销并归还端口。
    pub async fn close(&self) -> Result<(), MuxError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shut_listener();

        let mut errors = Vec::new();
        if let Some(file) = &self.delete_on_close
            && let Err(err) = file.remove(self.port).await
        {
            errors.push(map_io_error(error::REMOVE_FILE, err));
        }

        let release = self.release.lock().take();
        if let Some(release) = release {
            self.unregister(&release);
            if let Some(assigner) = release.return_to
                && let Err(err) = assigner.return_port(self.port).await
            {
                errors.push(err);
            }
        }
        debug!(port = self.port, "server endpoint closed");
        aggregate(errors)
    }

    /// 无法 `.await` 时的关闭路径：文件删除同步完成，端口归还交给当前运行时。
    fn close_detached(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shut_listener();
        if let Some(file) = &self.delete_on_close
            && let Err(err) = file.remove_blocking(self.port)
        {
            warn!(port = self.port, error = %err, "socket file not removed on drop");
        }
        let release = self.release.lock().take();
        let Some(release) = release else {
            return;
        };
        self.unregister(&release);
        let Some(assigner) = release.return_to else {
            return;
        };
        let port = self.port;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = assigner.return_port(port).await {
                        warn!(port, error = %err, "anonymous port not returned");
                    }
                });
            }
            Err(_) => warn!(port, "no runtime available, anonymous port not returned"),
        }
    }

    fn unregister(&self, release: &ServerRelease) {
        if release.registered
            && let Some(registries) = release.registries.upgrade()
        {
            registries.unregister_server(self.port, self);
        }
    }
}

/// 多路复用客户端连接。
///
/// # 契约（What）
/// - 读写直接委托给内部 `UnixStream`；
/// - [`MuxStream::close`] 幂等，关闭后读返回 EOF、写返回错误；
/// - 丢弃时自动关闭并从工厂登记表注销，凭据记录同时移除。
#[derive(Debug)]
pub struct MuxStream {
    inner: UnixStream,
    shared: Arc<StreamShared>,
    peer: HostAndPort,
    credentials: PeerCredentials,
    socket_file: PathBuf,
}

impl MuxStream {
    pub(crate) fn new(
        inner: UnixStream,
        shared: Arc<StreamShared>,
        peer: HostAndPort,
        credentials: PeerCredentials,
        socket_file: PathBuf,
    ) -> Self {
        Self {
            inner,
            shared,
            peer,
            credentials,
            socket_file,
        }
    }

    pub fn host(&self) -> &str {
        &self.peer.host
    }

    pub fn port(&self) -> i32 {
        self.peer.port
    }

    pub fn peer_credentials(&self) -> PeerCredentials {
        self.credentials
    }

    pub fn socket_file(&self) -> &Path {
        &self.socket_file
    }

    pub fn get_ref(&self) -> &UnixStream {
        &self.inner
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn close(&self) -> Result<(), MuxError> {
        self.shared.close()
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        if let Err(err) = self.shared.close() {
            debug!(port = self.peer.port, error = %err, "client close on drop failed");
        }
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// 多路复用服务端监听器。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - [`MuxListener::accept`] 在监听器被（本地或工厂）关闭时立即返回 [`MuxError::Closed`]，
///   与 IO 失败可区分；
/// - 关闭释放监听套接字，尚未被接受的入站连接随之被复位；
/// - 关闭只删除绑定时创建的那个套接字文件：若同一路径已被新的绑定替换，文件保留；
/// - 丢弃未关闭的监听器等价于关闭，但端口归还在后台任务中完成。
#[derive(Debug)]
pub struct MuxListener {
    shared: Arc<ListenerShared>,
    closed_rx: watch::Receiver<bool>,
    socket_file: PathBuf,
}

impl MuxListener {
    pub(crate) fn new(shared: Arc<ListenerShared>, socket_file: PathBuf) -> Self {
        let closed_rx = shared.subscribe();
        Self {
            shared,
            closed_rx,
            socket_file,
        }
    }

    pub fn port(&self) -> i32 {
        self.shared.port()
    }

    pub fn socket_file(&self) -> &Path {
        &self.socket_file
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub async fn accept(&self) -> Result<UnixStream, MuxError> {
        let mut closed = self.closed_rx.clone();
        if *closed.borrow_and_update() {
            return Err(MuxError::Closed);
        }
        let Some(listener) = self.shared.listener() else {
            return Err(MuxError::Closed);
        };
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(MuxError::Closed),
            accepted = listener.accept() => accepted
                .map(|(stream, _)| stream)
                .map_err(|err| map_io_error(error::ACCEPT, err)),
        }
    }

    pub async fn close(&self) -> Result<(), MuxError> {
        self.shared.close().await
    }
}

impl Drop for MuxListener {
    fn drop(&mut self) {
        self.shared.close_detached();
    }
}

/// 客户端端点。
#[derive(Debug)]
pub enum ClientEndpoint {
    Multiplexed(MuxStream),
    Conventional(TcpStream),
}

impl ClientEndpoint {
    pub fn is_multiplexed(&self) -> bool {
        matches!(self, Self::Multiplexed(_))
    }

    pub fn as_multiplexed(&self) -> Option<&MuxStream> {
        match self {
            Self::Multiplexed(stream) => Some(stream),
            Self::Conventional(_) => None,
        }
    }

    pub fn into_multiplexed(self) -> Option<MuxStream> {
        match self {
            Self::Multiplexed(stream) => Some(stream),
            Self::Conventional(_) => None,
        }
    }
}

/// 服务端端点。
#[derive(Debug)]
pub enum ServerEndpoint {
    Multiplexed(MuxListener),
    Conventional(TcpListener),
}

impl ServerEndpoint {
    pub fn is_multiplexed(&self) -> bool {
        matches!(self, Self::Multiplexed(_))
    }

    pub fn as_multiplexed(&self) -> Option<&MuxListener> {
        match self {
            Self::Multiplexed(listener) => Some(listener),
            Self::Conventional(_) => None,
        }
    }

    pub fn into_multiplexed(self) -> Option<MuxListener> {
        match self {
            Self::Multiplexed(listener) => Some(listener),
            Self::Conventional(_) => None,
        }
    }

    /// 端点监听的端口；常规端点返回内核实际绑定的端口。
    pub fn port(&self) -> Result<i32, MuxError> {
        match self {
            Self::Multiplexed(listener) => Ok(listener.port()),
            Self::Conventional(listener) => listener
                .local_addr()
                .map(|addr| i32::from(addr.port()))
                .map_err(|err| map_io_error(error::CONVENTIONAL, err)),
        }
    }

    pub async fn accept(&self) -> Result<Connection, MuxError> {
        match self {
            Self::Multiplexed(listener) => listener.accept().await.map(Connection::Local),
            Self::Conventional(listener) => listener
                .accept()
                .await
                .map(|(stream, _)| Connection::Tcp(stream))
                .map_err(|err| map_io_error(error::ACCEPT, err)),
        }
    }

    pub async fn close(&self) -> Result<(), MuxError> {
        match self {
            Self::Multiplexed(listener) => listener.close().await,
            Self::Conventional(_) => Ok(()),
        }
    }
}

/// 服务端接受的入站连接。
#[derive(Debug)]
pub enum Connection {
    Local(UnixStream),
    Tcp(TcpStream),
}

macro_rules! delegate_async_io {
    ($ty:ident { $($variant:ident),+ }) => {
        impl AsyncRead for $ty {
            fn poll_read(
                self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                match self.get_mut() {
                    $(Self::$variant(inner) => Pin::new(inner).poll_read(cx, buf),)+
                }
            }
        }

        impl AsyncWrite for $ty {
            fn poll_write(
                self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &[u8],
            ) -> Poll<io::Result<usize>> {
                match self.get_mut() {
                    $(Self::$variant(inner) => Pin::new(inner).poll_write(cx, buf),)+
                }
            }

            fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
                match self.get_mut() {
                    $(Self::$variant(inner) => Pin::new(inner).poll_flush(cx),)+
                }
            }

            fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
                match self.get_mut() {
                    $(Self::$variant(inner) => Pin::new(inner).poll_shutdown(cx),)+
                }
            }
        }
    };
}

delegate_async_io!(ClientEndpoint { Multiplexed, Conventional });
delegate_async_io!(Connection { Local, Tcp });
