//! 地址族注册表与统一地址类型。
//!
//! # 教案式导航
//! - **定位（Where）**：把 [`crate::unix`] 与 [`crate::tipc`] 两个地址族汇总成一个值，
//!   由调用方在启动时构造一次并显式传递，不存在进程级全局表；
//! - **分发（How）**：URI 依据 scheme 选择地址族，描述符依据地址族名称选择解码器。

use core::fmt;
use std::path::PathBuf;

use bytes::Bytes;

use crate::error::AddressError;
use crate::tipc::{self, TipcSocketAddress};
use crate::uri::UriParts;
use crate::unix::{self, UnixSocketAddress};

/// 已知地址族。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Unix,
    Tipc,
}

impl AddressFamily {
    /// 地址族名称，也是包装地址主机名中的族标记。
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unix => unix::FAMILY,
            Self::Tipc => tipc::FAMILY,
        }
    }

    /// 该地址族接受的 URI scheme。
    pub const fn schemes(self) -> &'static [&'static str] {
        match self {
            Self::Unix => unix::SCHEMES,
            Self::Tipc => tipc::SCHEMES,
        }
    }

    /// 是否接受该 scheme。
    pub fn supports_scheme(self, scheme: &str) -> bool {
        self.schemes().contains(&scheme)
    }

    /// 以本地址族解码描述符。
    pub fn from_bytes(self, bytes: impl Into<Bytes>, port: i32) -> Result<SocketAddress, AddressError> {
        Ok(match self {
            Self::Unix => SocketAddress::Unix(UnixSocketAddress::of_bytes(bytes, port)?),
            Self::Tipc => SocketAddress::Tipc(TipcSocketAddress::from_bytes(bytes, port)?),
        })
    }

    /// 以本地址族解析 URI。
    pub fn parse_uri(self, uri: &str, override_port: Option<i32>) -> Result<SocketAddress, AddressError> {
        Ok(match self {
            Self::Unix => SocketAddress::Unix(UnixSocketAddress::parse_uri_with_port(uri, override_port)?),
            Self::Tipc => SocketAddress::Tipc(TipcSocketAddress::parse_uri_with_port(uri, override_port)?),
        })
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 地址族注册表。
///
/// # 契约（What）
/// - [`AddressFamilyRegistry::standard`] 包含 `un` 与 `tipc`；
/// - 同一族重复注册被忽略；
/// - 未注册的 scheme 解析为 [`AddressError::UnsupportedScheme`]，属于 malformed 分类。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressFamilyRegistry {
    families: Vec<AddressFamily>,
}

impl AddressFamilyRegistry {
    /// 不含任何地址族的登记表。
    pub fn empty() -> Self {
        Self::default()
    }

    /// 登记本地套接字与集群消息两个地址族。
    pub fn standard() -> Self {
        Self::empty().with(AddressFamily::Unix).with(AddressFamily::Tipc)
    }

    #[must_use]
    pub fn with(mut self, family: AddressFamily) -> Self {
        if !self.families.contains(&family) {
            self.families.push(family);
        }
        self
    }

    /// 已登记的地址族。
    pub fn families(&self) -> &[AddressFamily] {
        &self.families
    }

    /// 按名称查找（`un`/`tipc`）。
    pub fn by_name(&self, name: &str) -> Option<AddressFamily> {
        self.families.iter().copied().find(|family| family.name() == name)
    }

    /// 按 URI scheme 查找。
    pub fn by_scheme(&self, scheme: &str) -> Option<AddressFamily> {
        self.families
            .iter()
            .copied()
            .find(|family| family.supports_scheme(scheme))
    }

    /// 按 scheme 分派解析 URI。
    pub fn parse_uri(&self, uri: &str) -> Result<SocketAddress, AddressError> {
        self.parse_uri_with_port(uri, None)
    }

    /// 按 scheme 分派解析 URI，`override_port` 存在时覆盖 URI 中的端口。
    pub fn parse_uri_with_port(
        &self,
        uri: &str,
        override_port: Option<i32>,
    ) -> Result<SocketAddress, AddressError> {
        let scheme = UriParts::scheme_of(uri)
            .ok_or_else(|| AddressError::malformed_uri("socket", uri, "missing scheme"))?;
        let family = self
            .by_scheme(scheme)
            .ok_or_else(|| AddressError::UnsupportedScheme(scheme.to_owned()))?;
        family.parse_uri(uri, override_port)
    }
}

/// 任一已知地址族的套接字地址。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    Unix(UnixSocketAddress),
    Tipc(TipcSocketAddress),
}

impl SocketAddress {
    /// 所属地址族。
    pub fn family(&self) -> AddressFamily {
        match self {
            Self::Unix(_) => AddressFamily::Unix,
            Self::Tipc(_) => AddressFamily::Tipc,
        }
    }

    /// 附带的端口。
    pub fn port(&self) -> i32 {
        match self {
            Self::Unix(address) => address.port(),
            Self::Tipc(address) => address.port(),
        }
    }

    /// 原始描述符字节。
    pub fn as_bytes(&self) -> &Bytes {
        match self {
            Self::Unix(address) => address.as_bytes(),
            Self::Tipc(address) => address.as_bytes(),
        }
    }

    /// 是否对应文件系统路径。
    pub fn has_filename(&self) -> bool {
        match self {
            Self::Unix(address) => address.has_filename(),
            Self::Tipc(address) => address.has_filename(),
        }
    }

    /// 对应的文件路径；没有文件的地址返回错误。
    pub fn file(&self) -> Result<PathBuf, AddressError> {
        match self {
            Self::Unix(address) => address.file(),
            Self::Tipc(_) => Err(AddressError::NoFilename("no file")),
        }
    }

    /// 以给定 scheme 渲染 URI。
    pub fn to_uri(&self, scheme: &str) -> Result<String, AddressError> {
        match self {
            Self::Unix(address) => address.to_uri(scheme),
            Self::Tipc(address) => address.to_uri(scheme),
        }
    }

    /// 若为本地套接字地址则返回之。
    pub fn as_unix(&self) -> Option<&UnixSocketAddress> {
        match self {
            Self::Unix(address) => Some(address),
            Self::Tipc(_) => None,
        }
    }

    /// 若为集群消息地址则返回之。
    pub fn as_tipc(&self) -> Option<&TipcSocketAddress> {
        match self {
            Self::Tipc(address) => Some(address),
            Self::Unix(_) => None,
        }
    }
}

impl From<UnixSocketAddress> for SocketAddress {
    fn from(value: UnixSocketAddress) -> Self {
        Self::Unix(value)
    }
}

impl From<TipcSocketAddress> for SocketAddress {
    fn from(value: TipcSocketAddress) -> Self {
        Self::Tipc(value)
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(address) => fmt::Display::fmt(address, f),
            Self::Tipc(address) => fmt::Display::fmt(address, f),
        }
    }
}
