//! 集群消息套接字地址：20 字节描述符与 URI 形式。
//!
//! # 教案式导航
//! - **布局**：五个大端 `u32` 字段 `[type, scope, a, b, c]`，由 [`encode`]/[`decode`] 负责；
//! - **URI**：`scheme://[scope-]type.a.b[.c][:port]`，格式化与解析互为逆运算；
//! - **端口**：描述符本身不含端口，端口是附加在地址上的多路复用编号。

use core::fmt;

use bytes::{Buf, BufMut, Bytes};

use crate::error::{AddressError, check_port};
use crate::kind::{AddressType, Scope, format_hex, parse_u32};
use crate::uri::UriParts;

/// 地址族名称。
pub const FAMILY: &str = "tipc";
/// 描述符固定长度。
pub const DESCRIPTOR_LEN: usize = 20;
/// 拓扑服务的名称类型。
pub const TOP_SRV: u32 = 1;
/// 用户可发布的最小名称类型。
pub const RESERVED_TYPES: u32 = 64;
/// 可解析的 URI scheme。
pub const SCHEMES: &[&str] = &["tipc", "http+tipc", "https+tipc"];

/// 解码后的五元组。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TipcFields {
    pub address_type: AddressType,
    pub scope: Scope,
    pub a: u32,
    pub b: u32,
    pub c: u32,
}

/// 把五元组编码为 20 字节大端描述符。
pub fn encode(address_type: AddressType, scope: Scope, a: u32, b: u32, c: u32) -> [u8; DESCRIPTOR_LEN] {
    let mut out = [0u8; DESCRIPTOR_LEN];
    let mut cursor = &mut out[..];
    cursor.put_u32(address_type.value());
    cursor.put_u32(scope.value());
    cursor.put_u32(a);
    cursor.put_u32(b);
    cursor.put_u32(c);
    out
}

/// 解码 20 字节描述符；长度不符时返回 [`AddressError::InvalidLength`]。
pub fn decode(bytes: &[u8]) -> Result<TipcFields, AddressError> {
    if bytes.is_empty() {
        return Err(AddressError::EmptyAddress);
    }
    if bytes.len() != DESCRIPTOR_LEN {
        return Err(AddressError::InvalidLength {
            family: FAMILY,
            expected: DESCRIPTOR_LEN,
            actual: bytes.len(),
        });
    }
    let mut cursor = bytes;
    Ok(TipcFields {
        address_type: AddressType::from_value(cursor.get_u32()),
        scope: Scope::from_value(cursor.get_u32()),
        a: cursor.get_u32(),
        b: cursor.get_u32(),
        c: cursor.get_u32(),
    })
}

/// 集群消息套接字地址。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 描述符字节在构造后不可变，`fields` 是其缓存的解码结果；
/// - 相等性与哈希同时覆盖描述符与端口；
/// - 端口取值 `>= -1`，`0` 表示无端口。
///
/// ## 注意事项（Trade-offs）
/// - 访问器按地址类型解释字段：对服务区间调用 [`TipcSocketAddress::reference`]
///   不会报错，而是返回 `a` 字段的原始值，调用方应先检查 [`TipcSocketAddress::address_type`]。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TipcSocketAddress {
    bytes: Bytes,
    fields: TipcFields,
    port: i32,
}

impl TipcSocketAddress {
    /// 服务地址：`type/instance`，可选 `domain`。
    pub fn of_service(scope: Scope, service_type: u32, instance: u32, domain: u32) -> Self {
        Self::from_fields(AddressType::ServiceAddr, scope, service_type, instance, domain, 0)
    }

    /// 服务区间：`type/[lower, upper]`。
    pub fn of_service_range(scope: Scope, service_type: u32, lower: u32, upper: u32) -> Self {
        Self::from_fields(AddressType::ServiceRange, scope, service_type, lower, upper, 0)
    }

    /// 套接字引用：`ref@node`。
    pub fn of_socket(reference: u32, node_hash: u32) -> Self {
        Self::from_fields(
            AddressType::SocketAddr,
            Scope::NotSpecified,
            reference,
            node_hash,
            0,
            0,
        )
    }

    /// 拓扑服务地址。
    pub fn of_topology_service() -> Self {
        Self::from_fields(AddressType::ServiceAddr, Scope::NotSpecified, TOP_SRV, TOP_SRV, 0, 0)
    }

    /// 由原始描述符构造。
    pub fn from_bytes(bytes: impl Into<Bytes>, port: i32) -> Result<Self, AddressError> {
        let bytes = bytes.into();
        let fields = decode(&bytes)?;
        Ok(Self {
            bytes,
            fields,
            port: check_port(port)?,
        })
    }

    /// 返回替换端口后的新地址。
    pub fn with_port(&self, port: i32) -> Result<Self, AddressError> {
        Ok(Self {
            bytes: self.bytes.clone(),
            fields: self.fields,
            port: check_port(port)?,
        })
    }

    fn from_fields(address_type: AddressType, scope: Scope, a: u32, b: u32, c: u32, port: i32) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(&encode(address_type, scope, a, b, c)),
            fields: TipcFields {
                address_type,
                scope,
                a,
                b,
                c,
            },
            port,
        }
    }

    /// 解码后的五个字段。
    pub fn fields(&self) -> TipcFields {
        self.fields
    }

    /// 查找作用域。
    pub fn scope(&self) -> Scope {
        self.fields.scope
    }

    /// 地址类型。
    pub fn address_type(&self) -> AddressType {
        self.fields.address_type
    }

    /// 服务类型（服务地址与服务区间的 `a`）。
    pub fn tipc_type(&self) -> u32 {
        self.fields.a
    }

    /// 服务实例（服务地址的 `b`）。
    pub fn instance(&self) -> u32 {
        self.fields.b
    }

    /// 查找域（服务地址的 `c`）。
    pub fn domain(&self) -> u32 {
        self.fields.c
    }

    /// 区间下界（服务区间的 `b`）。
    pub fn lower(&self) -> u32 {
        self.fields.b
    }

    /// 区间上界（服务区间的 `c`）。
    pub fn upper(&self) -> u32 {
        self.fields.c
    }

    /// 套接字引用（套接字地址的 `a`）。
    pub fn reference(&self) -> u32 {
        self.fields.a
    }

    /// 节点哈希（套接字地址的 `b`）。
    pub fn node_hash(&self) -> u32 {
        self.fields.b
    }

    /// 附带的端口，`0` 表示未指定。
    pub fn port(&self) -> i32 {
        self.port
    }

    /// 20 字节描述符。
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// 集群地址不对应文件系统路径。
    pub fn has_filename(&self) -> bool {
        false
    }

    /// 渲染 URI 的 authority 部分（不含端口）。
    ///
    /// 作用域等于地址类型的隐含默认值时省略；服务地址在省略作用域时连同类型一起省略。
    /// 未知地址类型总是带作用域输出，保证数值类型标记可被再次解析。
    pub fn uri_host(&self) -> String {
        let TipcFields {
            address_type,
            scope,
            a,
            b,
            c,
        } = self.fields;
        let known_type = !matches!(address_type, AddressType::Other(_));
        let scope_implied = known_type && scope == Scope::implied_for(address_type);

        let mut out = String::new();
        if !scope_implied {
            match scope {
                Scope::Cluster => out.push_str("cluster"),
                Scope::Node => out.push_str("node"),
                Scope::NotSpecified => out.push_str("default"),
                Scope::Other(value) => out.push_str(&uri_int(value)),
            }
            out.push('-');
        }
        match address_type.token() {
            Some(_) if scope_implied && address_type == AddressType::ServiceAddr => {}
            Some(token) => {
                out.push_str(token);
                out.push('.');
            }
            None => {
                out.push_str(&uri_int(address_type.value()));
                out.push('.');
            }
        }

        let render = |value: u32| {
            if address_type == AddressType::SocketAddr {
                format_hex(value)
            } else {
                uri_int(value)
            }
        };
        out.push_str(&render(a));
        out.push('.');
        out.push_str(&render(b));
        if c != 0 || address_type == AddressType::ServiceRange {
            out.push('.');
            out.push_str(&render(c));
        }
        out
    }

    /// 以给定 scheme 渲染 URI；scheme 不属于本地址族时返回错误。
    pub fn to_uri(&self, scheme: &str) -> Result<String, AddressError> {
        if !SCHEMES.contains(&scheme) {
            return Err(AddressError::UnsupportedScheme(scheme.to_owned()));
        }
        let mut out = format!("{scheme}://{}", self.uri_host());
        if self.port > 0 {
            out.push(':');
            out.push_str(&self.port.to_string());
        }
        Ok(out)
    }

    /// 解析 URI。
    pub fn parse_uri(uri: &str) -> Result<Self, AddressError> {
        Self::parse_uri_with_port(uri, None)
    }

    /// 解析 URI，`override_port` 存在时替换 URI 中的端口。
    pub fn parse_uri_with_port(uri: &str, override_port: Option<i32>) -> Result<Self, AddressError> {
        let parts = UriParts::split(uri, FAMILY)?;
        if !SCHEMES.contains(&parts.scheme) {
            return Err(AddressError::UnsupportedScheme(parts.scheme.to_owned()));
        }
        if parts.host.is_empty() {
            return Err(AddressError::malformed_uri(FAMILY, uri, "missing host"));
        }
        let bad = |reason: &str| AddressError::malformed_uri(FAMILY, uri, reason);

        let segments: Vec<&str> = parts.host.split('.').collect();
        let (address_type, scope, numbers) = match segments.as_slice() {
            [head, rest @ ..] if rest.len() == 2 || rest.len() == 3 => {
                match split_scope_and_type(head) {
                    Some(HeadToken::Typed { scope, address_type }) => {
                        let address_type =
                            AddressType::from_token(address_type).ok_or_else(|| bad("invalid address type"))?;
                        let scope = match scope {
                            Some(token) => Scope::from_token(token).ok_or_else(|| bad("invalid scope"))?,
                            None => Scope::implied_for(address_type),
                        };
                        (address_type, scope, rest)
                    }
                    Some(HeadToken::Numeric) if rest.len() == 2 => {
                        (AddressType::ServiceAddr, Scope::Cluster, segments.as_slice())
                    }
                    _ => return Err(bad("invalid scope or address type")),
                }
            }
            [_, _] => (AddressType::ServiceAddr, Scope::Cluster, segments.as_slice()),
            _ => return Err(bad("expected 2 or 3 numeric fields")),
        };

        let mut values = [0u32; 3];
        for (slot, token) in values.iter_mut().zip(numbers.iter()) {
            *slot = parse_u32(token).ok_or_else(|| bad("invalid numeric field"))?;
        }
        let [a, b, mut c] = values;
        if numbers.len() == 2 && address_type == AddressType::ServiceRange {
            c = b;
        }

        let port = match (override_port, parts.port) {
            (Some(port), _) => port,
            (None, Some(port)) => port,
            (None, None) => 0,
        };
        let mut address = Self::from_fields(address_type, scope, a, b, c, 0);
        address.port = check_port(port)?;
        Ok(address)
    }
}

enum HeadToken<'a> {
    /// 首段是 `[scope-]type`。
    Typed {
        scope: Option<&'a str>,
        address_type: &'a str,
    },
    /// 首段是数值字段 `a`。
    Numeric,
}

fn split_scope_and_type(head: &str) -> Option<HeadToken<'_>> {
    const NAMED: [&str; 3] = ["service-range", "service", "socket"];
    if NAMED.contains(&head) {
        return Some(HeadToken::Typed {
            scope: None,
            address_type: head,
        });
    }
    for name in NAMED {
        if let Some(scope) = head.strip_suffix(name).and_then(|s| s.strip_suffix('-'))
            && !scope.is_empty()
        {
            return Some(HeadToken::Typed {
                scope: Some(scope),
                address_type: name,
            });
        }
    }
    match head.split_once('-') {
        Some((scope, address_type)) if !scope.is_empty() && parse_u32(address_type).is_some() => {
            Some(HeadToken::Typed {
                scope: Some(scope),
                address_type,
            })
        }
        Some(_) => None,
        None => parse_u32(head).map(|_| HeadToken::Numeric),
    }
}

/// URI 中的整数：高位为零时十进制，否则 `0x` 十六进制。
fn uri_int(value: u32) -> String {
    if value & 0x8000_0000 == 0 {
        value.to_string()
    } else {
        format!("0x{value:x}")
    }
}

impl fmt::Display for TipcSocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let TipcFields {
            address_type,
            scope,
            a,
            b,
            c,
        } = self.fields;
        f.write_str("TipcSocketAddress[")?;
        if self.port != 0 {
            write!(f, "port={};", self.port)?;
        }
        write!(f, "{}]", address_type.debug_string(scope, a, b, c))
    }
}
