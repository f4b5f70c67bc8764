//! 通过本地套接字访问端口权威。
//!
//! # 线上帧格式
//!
//! 请求固定 5 字节：`[op:u8][arg:i32 BE]`，`op` 取值 `1=new_port`、`2=return_port`、`3=open_ports`，
//! `arg` 只对 `return_port` 有意义。
//!
//! 响应：`[status:u8][payload]`。
//! - `status = 0`：成功；`new_port` 载荷为 `i32`，`return_port` 无载荷，
//!   `open_ports` 载荷为 `u32` 个数后接升序 `i32` 列表；
//! - `status = 1`：权威不可用；`status = 2`：其他失败。二者载荷均为 `u16` 长度 + UTF-8 文本。
//!
//! 一条连接可以顺序承载多次请求。

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{OpenPorts, PortAssigner, PortPool};
use crate::error::{self, MuxError, map_io_error};

const OP_NEW_PORT: u8 = 1;
const OP_RETURN_PORT: u8 = 2;
const OP_OPEN_PORTS: u8 = 3;

const STATUS_OK: u8 = 0;
const STATUS_UNAVAILABLE: u8 = 1;
const STATUS_ERROR: u8 = 2;

/// 单次 `open_ports` 响应允许的最大端口数，防止损坏帧触发超大分配。
const MAX_OPEN_PORTS: u32 = 1 << 20;

/// 托管 [`PortPool`] 的本地套接字服务端。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 多个进程共享同一套接字目录时，需要一个跨进程的端口权威；
///   服务端把进程内端口池暴露为固定帧协议，客户端见 [`RemotePortAssigner`]。
///
/// ## 逻辑（How）
/// - `spawn` 绑定监听套接字（清理残留文件）并启动接收循环；
/// - 每条入站连接在独立任务中顺序处理请求，直到对端关闭；
/// - `shutdown` 通过 `watch` 通知接收循环退出，等待其结束后删除套接字文件。
///
/// ## 契约（What）
/// - 必须在 Tokio 运行时内调用 `spawn`；
/// - `shutdown` 幂等；对象被丢弃时接收循环同样会退出，但不会删除文件。
#[derive(Debug)]
pub struct PortAuthorityServer {
    path: PathBuf,
    pool: Arc<PortPool>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PortAuthorityServer {
    pub async fn spawn(path: impl Into<PathBuf>, pool: Arc<PortPool>) -> Result<Self, MuxError> {
        let path = path.into();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "stale authority socket removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(map_io_error(error::BIND, err)),
        }
        let listener = UnixListener::bind(&path).map_err(|err| map_io_error(error::BIND, err))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&pool), shutdown_rx));
        debug!(path = %path.display(), "port authority listening");
        Ok(Self {
            path,
            pool,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &Arc<PortPool> {
        &self.pool
    }

    /// 停止服务并删除套接字文件。
    pub async fn shutdown(&self) -> Result<(), MuxError> {
        self.shutdown_tx.send_replace(true);
        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };
        if let Err(err) = task.await {
            warn!(error = %err, "port authority accept loop ended abnormally");
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(map_io_error(error::REMOVE_FILE, err)),
        }
    }
}

impl Drop for PortAuthorityServer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn accept_loop(listener: UnixListener, pool: Arc<PortPool>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(stream, Arc::clone(&pool)));
                }
                Err(err) => {
                    warn!(error = %err, "port authority accept failed");
                }
            },
        }
    }
    debug!("port authority stopped");
}

async fn serve_connection(mut stream: UnixStream, pool: Arc<PortPool>) {
    loop {
        let op = match stream.read_u8().await {
            Ok(op) => op,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(err) => {
                warn!(error = %err, "port authority read failed");
                return;
            }
        };
        let arg = match stream.read_i32().await {
            Ok(arg) => arg,
            Err(err) => {
                warn!(error = %err, op, "truncated port authority request");
                return;
            }
        };
        let response = handle_request(&pool, op, arg);
        if let Err(err) = stream.write_all(&response).await {
            warn!(error = %err, "port authority write failed");
            return;
        }
    }
}

fn handle_request(pool: &PortPool, op: u8, arg: i32) -> BytesMut {
    let mut out = BytesMut::with_capacity(16);
    let outcome = match op {
        OP_NEW_PORT => pool.allocate().map(|port| {
            out.put_u8(STATUS_OK);
            out.put_i32(port);
        }),
        OP_RETURN_PORT => pool.release(arg).map(|_| out.put_u8(STATUS_OK)),
        OP_OPEN_PORTS => pool.snapshot().map(|ports| {
            out.put_u8(STATUS_OK);
            out.put_u32(ports.len() as u32);
            for port in &ports {
                out.put_i32(port);
            }
        }),
        other => Err(MuxError::Record(format!("unknown authority op {other}"))),
    };
    if let Err(err) = outcome {
        out.clear();
        let status = if err.is_unavailable() {
            STATUS_UNAVAILABLE
        } else {
            STATUS_ERROR
        };
        put_message(&mut out, status, &err.to_string());
    }
    out
}

fn put_message(out: &mut BytesMut, status: u8, message: &str) {
    let bytes = message.as_bytes();
    let len = bytes.len().min(usize::from(u16::MAX));
    out.put_u8(status);
    out.put_u16(len as u16);
    out.put_slice(&bytes[..len]);
}

/// 访问 [`PortAuthorityServer`] 的客户端。
///
/// 每次调用建立一条新连接；权威的套接字文件不存在或拒绝连接时报告
/// [`MuxError::Unavailable`]，其余 IO 失败报告为 [`MuxError::Io`]。
#[derive(Debug, Clone)]
pub struct RemotePortAssigner {
    path: PathBuf,
}

impl RemotePortAssigner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn exchange(&self, op: u8, arg: i32) -> Result<UnixStream, MuxError> {
        let mut stream = UnixStream::connect(&self.path).await.map_err(|err| match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => MuxError::Unavailable(format!(
                "{}: {err}",
                self.path.display()
            )),
            _ => map_io_error(error::AUTHORITY, err),
        })?;
        let mut frame = BytesMut::with_capacity(5);
        frame.put_u8(op);
        frame.put_i32(arg);
        stream.write_all(&frame).await.map_err(authority_io)?;
        let status = stream.read_u8().await.map_err(authority_io)?;
        match status {
            STATUS_OK => Ok(stream),
            STATUS_UNAVAILABLE | STATUS_ERROR => {
                let len = stream.read_u16().await.map_err(authority_io)?;
                let mut message = vec![0u8; usize::from(len)];
                stream.read_exact(&mut message).await.map_err(authority_io)?;
                let message = String::from_utf8_lossy(&message).into_owned();
                if status == STATUS_UNAVAILABLE {
                    Err(MuxError::Unavailable(message))
                } else {
                    Err(MuxError::Record(message))
                }
            }
            other => Err(MuxError::Record(format!("unknown authority status {other}"))),
        }
    }
}

fn authority_io(err: io::Error) -> MuxError {
    map_io_error(error::AUTHORITY, err)
}

#[async_trait]
impl PortAssigner for RemotePortAssigner {
    async fn new_port(&self) -> Result<i32, MuxError> {
        let mut stream = self.exchange(OP_NEW_PORT, 0).await?;
        stream.read_i32().await.map_err(authority_io)
    }

    async fn return_port(&self, port: i32) -> Result<(), MuxError> {
        self.exchange(OP_RETURN_PORT, port).await.map(|_| ())
    }

    async fn open_ports(&self) -> Result<OpenPorts, MuxError> {
        let mut stream = self.exchange(OP_OPEN_PORTS, 0).await?;
        let count = stream.read_u32().await.map_err(authority_io)?;
        if count > MAX_OPEN_PORTS {
            return Err(MuxError::Record(format!("open port count {count} too large")));
        }
        let mut ports = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ports.push(stream.read_i32().await.map_err(authority_io)?);
        }
        ports.sort_unstable();
        Ok(OpenPorts::from_sorted(ports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ANONYMOUS_PORT_BASE;

    #[tokio::test]
    async fn remote_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authority.sock");
        let pool = Arc::new(PortPool::new());
        let server = PortAuthorityServer::spawn(&path, Arc::clone(&pool)).await.unwrap();
        let client = RemotePortAssigner::new(&path);

        let first = client.new_port().await.unwrap();
        let second = client.new_port().await.unwrap();
        assert_eq!(first, ANONYMOUS_PORT_BASE);
        assert_eq!(second, ANONYMOUS_PORT_BASE + 1);

        client.return_port(first).await.unwrap();
        client.return_port(7).await.unwrap();
        let open = client.open_ports().await.unwrap();
        assert_eq!(open.as_slice(), &[second]);
        assert_eq!(pool.snapshot().unwrap(), open);

        server.shutdown().await.unwrap();
        assert!(!path.exists());
        assert!(client.new_port().await.unwrap_err().is_unavailable());
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_server_stops_accepting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authority.sock");
        let server = PortAuthorityServer::spawn(&path, Arc::new(PortPool::new())).await.unwrap();
        let client = RemotePortAssigner::new(&path);
        client.new_port().await.unwrap();

        drop(server);
        let stopped = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !client.new_port().await.is_err_and(|err| err.is_unavailable()) {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(stopped.is_ok());
    }

    #[tokio::test]
    async fn closed_pool_reports_unavailable_over_the_wire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authority.sock");
        let pool = Arc::new(PortPool::new());
        let server = PortAuthorityServer::spawn(&path, Arc::clone(&pool)).await.unwrap();
        pool.close();
        let err = RemotePortAssigner::new(&path).new_port().await.unwrap_err();
        assert!(err.is_unavailable(), "{err}");
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn missing_authority_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let client = RemotePortAssigner::new(dir.path().join("nobody.sock"));
        assert!(client.open_ports().await.unwrap_err().is_unavailable());
    }

    #[test]
    fn unknown_op_is_an_error_frame() {
        let pool = PortPool::new();
        let frame = handle_request(&pool, 9, 0);
        assert_eq!(frame[0], STATUS_ERROR);
        let ok = handle_request(&pool, OP_NEW_PORT, 0);
        assert_eq!(&ok[..], &[STATUS_OK, 0x00, 0x01, 0xad, 0xb0]);
    }
}
