use core::fmt;

use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::{self, MuxError, map_io_error};

/// 低端口的常规 TCP 回退。
///
/// 端口低于 `AF_PORT_BASE` 且工厂配置了常规回退时，客户端按调用方给出的主机名连接，
/// 服务端绑定到本结构记录的主机地址。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConventionalFactory {
    host: String,
}

impl ConventionalFactory {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// 只接受本机回环的默认回退。
    pub fn loopback() -> Self {
        Self::new("127.0.0.1")
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn connect(&self, host: &str, port: i32) -> Result<TcpStream, MuxError> {
        let port = tcp_port(port)?;
        debug!(host, port, "conventional connect");
        TcpStream::connect((host, port))
            .await
            .map_err(|err| map_io_error(error::CONVENTIONAL, err))
    }

    pub async fn bind(&self, port: i32) -> Result<TcpListener, MuxError> {
        let port = tcp_port(port)?;
        debug!(host = %self.host, port, "conventional bind");
        TcpListener::bind((self.host.as_str(), port))
            .await
            .map_err(|err| map_io_error(error::CONVENTIONAL, err))
    }
}

impl fmt::Display for ConventionalFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}", self.host)
    }
}

fn tcp_port(port: i32) -> Result<u16, MuxError> {
    u16::try_from(port).map_err(|_| MuxError::PortOutOfRange(port))
}
