//! 通用网络地址包装：把任意地址族的描述符编码进“主机名 + 端口”。
//!
//! 主机名形如 `<十六进制描述符>.<地址族>.junixsocket`，只面向只认识主机名/端口的上层
//! API 透传，不可被 DNS 解析。

use core::fmt;

use crate::error::AddressError;
use crate::family::{AddressFamily, AddressFamilyRegistry, SocketAddress};
use crate::tipc::TipcSocketAddress;
use crate::unix::UnixSocketAddress;

/// 包装主机名的固定后缀。
pub const WRAPPED_HOST_SUFFIX: &str = ".junixsocket";

/// 主机名 + 端口形式的包装地址。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WrappedAddress {
    host: String,
    port: i32,
}

impl WrappedAddress {
    /// 由主机名与端口构造。
    pub fn new(host: impl Into<String>, port: i32) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// 包装后的主机名。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端口。
    pub fn port(&self) -> i32 {
        self.port
    }

    /// 主机名是否为包装格式（不校验地址族与描述符）。
    pub fn is_wrapped_host(host: &str) -> bool {
        host.ends_with(WRAPPED_HOST_SUFFIX)
    }

    /// 拆出地址族名称与十六进制描述符。
    fn split_host(&self) -> Result<(&str, &str), AddressError> {
        let unsupported = || AddressError::UnsupportedAddress {
            expected: "wrapped socket address",
            actual: self.host.clone(),
        };
        let stem = self.host.strip_suffix(WRAPPED_HOST_SUFFIX).ok_or_else(unsupported)?;
        let (hex_bytes, family) = stem.rsplit_once('.').ok_or_else(unsupported)?;
        Ok((hex_bytes, family))
    }

    /// 按期望地址族解包；地址族不符时返回 [`AddressError::UnsupportedAddress`]。
    pub fn unwrap_as(&self, expected: AddressFamily) -> Result<SocketAddress, AddressError> {
        let (hex_bytes, family) = self.split_host()?;
        if family != expected.name() {
            return Err(AddressError::UnsupportedAddress {
                expected: expected.name(),
                actual: family.to_owned(),
            });
        }
        let bytes = hex::decode(hex_bytes).map_err(|err| AddressError::MalformedUri {
            family: expected.name(),
            uri: self.host.clone(),
            reason: err.to_string(),
        })?;
        expected.from_bytes(bytes, self.port)
    }

    /// 按注册表中的任一地址族解包。
    pub fn unwrap_with(&self, registry: &AddressFamilyRegistry) -> Result<SocketAddress, AddressError> {
        let (_, family) = self.split_host()?;
        let family = registry
            .by_name(family)
            .ok_or_else(|| AddressError::UnsupportedAddress {
                expected: "registered address family",
                actual: family.to_owned(),
            })?;
        self.unwrap_as(family)
    }
}

impl fmt::Display for WrappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl SocketAddress {
    /// 包装为主机名 + 端口。
    pub fn wrap(&self) -> WrappedAddress {
        WrappedAddress::new(
            format!(
                "{}.{}{WRAPPED_HOST_SUFFIX}",
                hex::encode(self.as_bytes()),
                self.family().name()
            ),
            self.port(),
        )
    }
}

impl UnixSocketAddress {
    /// 包装为主机名 + 端口。
    pub fn wrap(&self) -> WrappedAddress {
        SocketAddress::Unix(self.clone()).wrap()
    }

    /// 从包装形式还原；地址族不符时报告不支持。
    pub fn unwrap(wrapped: &WrappedAddress) -> Result<Self, AddressError> {
        match wrapped.unwrap_as(AddressFamily::Unix)? {
            SocketAddress::Unix(address) => Ok(address),
            other => Err(AddressError::UnsupportedAddress {
                expected: AddressFamily::Unix.name(),
                actual: other.family().name().to_owned(),
            }),
        }
    }
}

impl TipcSocketAddress {
    /// 包装为主机名 + 端口。
    pub fn wrap(&self) -> WrappedAddress {
        SocketAddress::Tipc(self.clone()).wrap()
    }

    /// 从包装形式还原；地址族不符时报告不支持。
    pub fn unwrap(wrapped: &WrappedAddress) -> Result<Self, AddressError> {
        match wrapped.unwrap_as(AddressFamily::Tipc)? {
            SocketAddress::Tipc(address) => Ok(address),
            other => Err(AddressError::UnsupportedAddress {
                expected: AddressFamily::Tipc.name(),
                actual: other.family().name().to_owned(),
            }),
        }
    }
}
