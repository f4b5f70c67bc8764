//! 本地套接字的连接、绑定与对端凭据读取。
//!
//! # 教案式导航
//! - **定位（Where）**：多路复用工厂唯一的系统调用出口，测试可替换为自定义实现；
//! - **做法（How）**：[`TokioTransport`] 委托给 Tokio `UnixStream`/`UnixListener`；
//!   抽象命名空间地址经标准库 `SocketAddrExt` 建立后再转入 Tokio。

use core::fmt;
use std::io;

use async_trait::async_trait;
use spark_afaddr::{TipcSocketAddress, UnixSocketAddress};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use crate::credentials::PeerCredentials;
use crate::error::{self, MuxError, map_io_error};

/// 本地传输协作者。
#[async_trait]
pub trait LocalTransport: Send + Sync + fmt::Debug {
    /// 连接到本地套接字地址。
    async fn connect(&self, address: &UnixSocketAddress) -> Result<UnixStream, MuxError>;

    /// 绑定监听套接字；`reuse` 为真时先移除残留的套接字文件。
    async fn bind(&self, address: &UnixSocketAddress, reuse: bool) -> Result<UnixListener, MuxError>;

    /// 读取已连接套接字的对端凭据。
    fn peer_credentials(&self, stream: &UnixStream) -> Result<PeerCredentials, MuxError>;

    /// 连接集群消息套接字；默认不支持。
    async fn connect_cluster(&self, address: &TipcSocketAddress) -> Result<UnixStream, MuxError> {
        let _ = address;
        Err(MuxError::Unsupported("cluster messaging sockets"))
    }
}

/// 基于 Tokio 的默认实现。
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTransport;

#[async_trait]
impl LocalTransport for TokioTransport {
    async fn connect(&self, address: &UnixSocketAddress) -> Result<UnixStream, MuxError> {
        if address.is_in_abstract_namespace() {
            return connect_abstract(address).await;
        }
        let path = address.file()?;
        UnixStream::connect(&path)
            .await
            .map_err(|err| map_io_error(error::CONNECT, err))
    }

    async fn bind(&self, address: &UnixSocketAddress, reuse: bool) -> Result<UnixListener, MuxError> {
        if address.is_in_abstract_namespace() {
            return bind_abstract(address);
        }
        let path = address.file()?;
        if reuse {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "stale socket file removed before bind"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(map_io_error(error::BIND, err)),
            }
        }
        UnixListener::bind(&path).map_err(|err| map_io_error(error::BIND, err))
    }

    fn peer_credentials(&self, stream: &UnixStream) -> Result<PeerCredentials, MuxError> {
        let cred = stream
            .peer_cred()
            .map_err(|err| map_io_error(error::PEER_CREDENTIALS, err))?;
        Ok(PeerCredentials {
            pid: cred.pid(),
            uid: cred.uid(),
            gid: cred.gid(),
        })
    }
}

#[cfg(target_os = "linux")]
async fn connect_abstract(address: &UnixSocketAddress) -> Result<UnixStream, MuxError> {
    use std::os::linux::net::SocketAddrExt;

    let name = address.as_bytes().slice(1..);
    let std_stream = tokio::task::spawn_blocking(move || {
        let addr = std::os::unix::net::SocketAddr::from_abstract_name(&name)?;
        let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
        stream.set_nonblocking(true)?;
        Ok::<_, io::Error>(stream)
    })
    .await
    .map_err(|err| map_io_error(error::CONNECT, io::Error::other(err)))?
    .map_err(|err| map_io_error(error::CONNECT, err))?;
    UnixStream::from_std(std_stream).map_err(|err| map_io_error(error::CONNECT, err))
}

#[cfg(target_os = "linux")]
fn bind_abstract(address: &UnixSocketAddress) -> Result<UnixListener, MuxError> {
    use std::os::linux::net::SocketAddrExt;

    let bind = || -> io::Result<UnixListener> {
        let addr = std::os::unix::net::SocketAddr::from_abstract_name(&address.as_bytes()[1..])?;
        let listener = std::os::unix::net::UnixListener::bind_addr(&addr)?;
        listener.set_nonblocking(true)?;
        UnixListener::from_std(listener)
    };
    bind().map_err(|err| map_io_error(error::BIND, err))
}

#[cfg(not(target_os = "linux"))]
async fn connect_abstract(_address: &UnixSocketAddress) -> Result<UnixStream, MuxError> {
    Err(MuxError::Unsupported("abstract namespace sockets"))
}

#[cfg(not(target_os = "linux"))]
fn bind_abstract(_address: &UnixSocketAddress) -> Result<UnixListener, MuxError> {
    Err(MuxError::Unsupported("abstract namespace sockets"))
}
