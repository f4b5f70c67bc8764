use std::io;

use spark_afaddr::AddressError;
use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const CONNECT: OperationKind = OperationKind {
    code: "spark.afmux.connect_failed",
    message: "local socket connect",
};
pub const BIND: OperationKind = OperationKind {
    code: "spark.afmux.bind_failed",
    message: "local socket bind",
};
pub const ACCEPT: OperationKind = OperationKind {
    code: "spark.afmux.accept_failed",
    message: "local socket accept",
};
pub const PEER_CREDENTIALS: OperationKind = OperationKind {
    code: "spark.afmux.peer_credentials_failed",
    message: "peer credentials",
};
pub const SHUTDOWN: OperationKind = OperationKind {
    code: "spark.afmux.shutdown_failed",
    message: "local socket shutdown",
};
pub const REMOVE_FILE: OperationKind = OperationKind {
    code: "spark.afmux.remove_file_failed",
    message: "socket file removal",
};
pub const AUTHORITY: OperationKind = OperationKind {
    code: "spark.afmux.authority_failed",
    message: "port authority exchange",
};
pub const CONVENTIONAL: OperationKind = OperationKind {
    code: "spark.afmux.conventional_failed",
    message: "conventional socket",
};
pub const CONFIG_READ: OperationKind = OperationKind {
    code: "spark.afmux.config_read_failed",
    message: "configuration read",
};

const UNSUPPORTED_CODE: &str = "spark.afmux.unsupported";
const UNAVAILABLE_CODE: &str = "spark.afmux.unavailable";
const CLOSED_CODE: &str = "spark.afmux.closed";
const SHUTDOWN_CODE: &str = "spark.afmux.close_failed";
const RECORD_CODE: &str = "spark.afmux.invalid_record";
const CONFIG_CODE: &str = "spark.afmux.invalid_config";
const PORT_CODE: &str = "spark.afmux.port_out_of_range";

/// 多路复用层统一错误类型。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用方需要区分三类失败：地址非法（[`MuxError::Address`]）、底层 IO 失败
///   （[`MuxError::Io`]，带稳定操作码）、端口权威不可达（[`MuxError::Unavailable`]）；
/// - 关闭工厂时可能聚合多个失败，[`MuxError::Shutdown`] 保留首个错误并附带其余被抑制的错误。
///
/// ## 契约（What）
/// - [`MuxError::code`] 返回稳定错误码，IO 错误沿用对应 [`OperationKind::code`]；
/// - [`MuxError::Closed`] 专用于“资源已被并发关闭”，与超时等其他失败可区分；
/// - [`MuxError::is_retryable`] 只对短暂性 IO 失败返回 `true`。
#[derive(Debug, Error)]
pub enum MuxError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("{}: {source}", .op.message)]
    Io {
        op: OperationKind,
        #[source]
        source: io::Error,
    },
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("port authority unavailable: {0}")]
    Unavailable(String),
    #[error("socket closed")]
    Closed,
    #[error("close failed: {first} ({} suppressed)", .suppressed.len())]
    Shutdown {
        first: Box<MuxError>,
        suppressed: Vec<MuxError>,
    },
    #[error("invalid external record: {0}")]
    Record(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("port out of range: {0}")]
    PortOutOfRange(i32),
}

impl MuxError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Address(err) => err.code(),
            Self::Io { op, .. } => op.code,
            Self::Unsupported(_) => UNSUPPORTED_CODE,
            Self::Unavailable(_) => UNAVAILABLE_CODE,
            Self::Closed => CLOSED_CODE,
            Self::Shutdown { .. } => SHUTDOWN_CODE,
            Self::Record(_) => RECORD_CODE,
            Self::Config(_) => CONFIG_CODE,
            Self::PortOutOfRange(_) => PORT_CODE,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// 短暂性失败，调用方可稍后重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::AddrInUse
                    | io::ErrorKind::TimedOut
            ),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }

    /// 若为 IO 错误，返回底层 [`io::ErrorKind`]。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// 将 IO 错误映射为带操作码的 [`MuxError::Io`]。
pub(crate) fn map_io_error(op: OperationKind, source: io::Error) -> MuxError {
    MuxError::Io { op, source }
}

/// 把一组关闭错误折叠为单个结果：首个错误对外，其余挂在 `suppressed` 上。
pub(crate) fn aggregate(mut errors: Vec<MuxError>) -> Result<(), MuxError> {
    if errors.is_empty() {
        return Ok(());
    }
    let first = errors.remove(0);
    if errors.is_empty() {
        return Err(first);
    }
    Err(MuxError::Shutdown {
        first: Box::new(first),
        suppressed: errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_carry_operation_code() {
        let err = map_io_error(BIND, io::Error::from(io::ErrorKind::AddrInUse));
        assert_eq!(err.code(), "spark.afmux.bind_failed");
        assert!(err.is_retryable());
        assert_eq!(err.io_kind(), Some(io::ErrorKind::AddrInUse));
        assert!(err.to_string().starts_with("local socket bind:"));
    }

    #[test]
    fn aggregate_keeps_first_and_suppresses_rest() {
        assert!(aggregate(Vec::new()).is_ok());
        assert!(matches!(aggregate(vec![MuxError::Closed]), Err(MuxError::Closed)));
        let err = aggregate(vec![
            MuxError::Unsupported("a"),
            MuxError::Closed,
            MuxError::PortOutOfRange(-9),
        ])
        .unwrap_err();
        match err {
            MuxError::Shutdown { first, suppressed } => {
                assert!(matches!(*first, MuxError::Unsupported("a")));
                assert_eq!(suppressed.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn address_errors_keep_their_code() {
        let err = MuxError::from(AddressError::EmptyAddress);
        assert_eq!(err.code(), "spark.afaddr.empty_address");
        assert!(!err.is_retryable());
    }
}
