//! 本地（Unix 域）套接字地址。
//!
//! # 教案式导航
//! - **描述符**：路径原始字节；首字节为 `0` 时表示 Linux 抽象命名空间，其后为名称；
//! - **可读投影**：[`UnixSocketAddress::path`] 把 `0` 显示为 `@`、其他不可打印字节显示为 `.`；
//! - **URI**：`unix:///abs/path` 仅适用于有文件名的地址，
//!   `http+unix://` / `https+unix://` 把全部字节百分号编码进 authority，抽象地址同样可表达。

use core::fmt;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{AddressError, check_port};
use crate::uri::{UriParts, percent_decode, percent_encode};

/// 地址族名称。
pub const FAMILY: &str = "un";
/// 可解析的 URI scheme。
pub const SCHEMES: &[&str] = &["unix", "http+unix", "https+unix"];

/// Unix 域套接字地址。
///
/// # 契约（What）
/// - 字节序列非空且构造后不可变；
/// - 端口 `>= -1`，只用于多路复用编号，不参与内核寻址；
/// - 相等性与哈希同时覆盖字节与端口。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnixSocketAddress {
    bytes: Bytes,
    port: i32,
}

impl UnixSocketAddress {
    /// 以文件系统路径构造。
    pub fn of_path(path: impl AsRef<Path>, port: i32) -> Result<Self, AddressError> {
        Self::of_bytes(path.as_ref().as_os_str().as_bytes().to_vec(), port)
    }

    /// 以原始字节构造；空字节序列被拒绝。
    pub fn of_bytes(bytes: impl Into<Bytes>, port: i32) -> Result<Self, AddressError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(AddressError::EmptyAddress);
        }
        Ok(Self {
            bytes,
            port: check_port(port)?,
        })
    }

    /// 抽象命名空间地址，`name` 不含前导 `0`。
    pub fn in_abstract_namespace(name: impl AsRef<[u8]>, port: i32) -> Result<Self, AddressError> {
        let name = name.as_ref();
        let mut bytes = Vec::with_capacity(name.len() + 1);
        bytes.push(0);
        bytes.extend_from_slice(name);
        Self::of_bytes(bytes, port)
    }

    /// 同一路径、不同端口的新地址。
    pub fn with_port(&self, port: i32) -> Result<Self, AddressError> {
        Ok(Self {
            bytes: self.bytes.clone(),
            port: check_port(port)?,
        })
    }

    /// 附带的端口。
    pub fn port(&self) -> i32 {
        self.port
    }

    /// 原始路径描述符；抽象命名空间以 `0x00` 开头。
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// 返回路径字节的副本。
    pub fn path_as_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// 是否位于 Linux 抽象命名空间。
    pub fn is_in_abstract_namespace(&self) -> bool {
        self.bytes.first() == Some(&0)
    }

    /// 是否对应文件系统中的路径。
    pub fn has_filename(&self) -> bool {
        !self.is_in_abstract_namespace()
    }

    /// 人类可读的路径。
    ///
    /// 抽象命名空间地址只保留可打印 ASCII；普通路径额外保留 `>= 0x80` 的字节，
    /// 以便多字节 UTF-8 文件名原样显示。
    pub fn path(&self) -> String {
        let ascii_only = self.is_in_abstract_namespace();
        let projected: Vec<u8> = self
            .bytes
            .iter()
            .map(|&b| match b {
                0 => b'@',
                127 => b'.',
                32..=126 => b,
                128..=255 if !ascii_only => b,
                _ => b'.',
            })
            .collect();
        String::from_utf8_lossy(&projected).into_owned()
    }

    /// 对应的文件路径；抽象命名空间地址没有文件。
    pub fn file(&self) -> Result<PathBuf, AddressError> {
        if self.is_in_abstract_namespace() {
            return Err(AddressError::NoFilename("socket is in abstract namespace"));
        }
        Ok(PathBuf::from(OsStr::from_bytes(&self.bytes)))
    }

    /// 以给定 scheme 渲染 URI。
    pub fn to_uri(&self, scheme: &str) -> Result<String, AddressError> {
        match scheme {
            "unix" => {
                let path = self.file()?;
                let bytes = path.as_os_str().as_bytes();
                if bytes.first() != Some(&b'/') {
                    return Err(AddressError::NoFilename("unix URI requires an absolute path"));
                }
                Ok(format!("unix://{}", percent_encode(bytes, b"/")))
            }
            "http+unix" | "https+unix" => {
                let mut out = format!("{scheme}://{}", percent_encode(&self.bytes, b""));
                if self.port > 0 {
                    out.push(':');
                    out.push_str(&self.port.to_string());
                }
                out.push('/');
                Ok(out)
            }
            other => Err(AddressError::UnsupportedScheme(other.to_owned())),
        }
    }

    /// 解析 URI，缺省端口为 `0`。
    pub fn parse_uri(uri: &str) -> Result<Self, AddressError> {
        Self::parse_uri_with_port(uri, None)
    }

    /// 解析 URI；`unix://` 形式不携带端口，只能由 `override_port` 提供。
    pub fn parse_uri_with_port(uri: &str, override_port: Option<i32>) -> Result<Self, AddressError> {
        let parts = UriParts::split(uri, FAMILY)?;
        let (encoded, port) = match parts.scheme {
            "unix" => {
                if !parts.host.is_empty() {
                    return Err(AddressError::malformed_uri(
                        FAMILY,
                        uri,
                        "unix URI must not carry an authority",
                    ));
                }
                (parts.path, None)
            }
            "http+unix" | "https+unix" => (parts.host, parts.port),
            other => return Err(AddressError::UnsupportedScheme(other.to_owned())),
        };
        let bytes = percent_decode(encoded)
            .ok_or_else(|| AddressError::malformed_uri(FAMILY, uri, "invalid percent-encoding"))?;
        if bytes.is_empty() {
            return Err(AddressError::malformed_uri(FAMILY, uri, "missing path"));
        }
        Self::of_bytes(bytes, override_port.or(port).unwrap_or(0))
    }
}

impl fmt::Display for UnixSocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixSocketAddress[port={};path=", self.port)?;
        for &b in self.bytes.iter() {
            if (32..127).contains(&b) {
                write!(f, "{}", char::from(b))?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        f.write_str("]")
    }
}
