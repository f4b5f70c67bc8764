//! 集群消息地址的“作用域”与“地址类型”标签。
//!
//! # 教案式导航
//! - **定位（Where）**：叶子模块，不依赖本 crate 其他部分；[`crate::tipc`] 依赖这里的名称↔数值映射。
//! - **动机（Why）**：线上字节中二者都是 32 位整数，但调试输出与 URI 需要稳定名称；
//!   未知数值也必须能原样保留，否则解码-再编码会丢信息。
//! - **做法（How）**：闭合枚举 + `Other(u32)` 兜底变体，格式化逻辑以纯函数挂在变体上，通过模式匹配分发。

use core::fmt;

/// 把整数格式化为零填充的 8 位十六进制（`0x%08x`）。
pub fn format_hex(value: u32) -> String {
    format!("0x{value:08x}")
}

/// 解析无符号 32 位整数：十进制或 `0x` 前缀十六进制。
pub(crate) fn parse_u32(token: &str) -> Option<u32> {
    if let Some(hex) = token.strip_prefix("0x") {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(hex, 16).ok()
    } else {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        token.parse().ok()
    }
}

/// 集群地址的可见性作用域。
///
/// # 契约（What）
/// - `NotSpecified = 0`：未声明，套接字地址的默认值；
/// - `Cluster = 2`：集群全局可见，服务地址与服务区间的默认值；
/// - `Node = 3`：仅本节点可见；
/// - `Other(v)`：线上出现的未知数值，原样保留，`value()` 返回 `v`。
///
/// `from_value` 对已知数值总是返回具名变体，因此 `Other` 永远不携带 0/2/3。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    NotSpecified,
    Cluster,
    Node,
    Other(u32),
}

impl Scope {
    /// 由线上数值构造。
    pub const fn from_value(value: u32) -> Self {
        match value {
            0 => Self::NotSpecified,
            2 => Self::Cluster,
            3 => Self::Node,
            other => Self::Other(other),
        }
    }

    /// 返回线上数值。
    pub const fn value(self) -> u32 {
        match self {
            Self::NotSpecified => 0,
            Self::Cluster => 2,
            Self::Node => 3,
            Self::Other(value) => value,
        }
    }

    /// 具名变体返回常量名；未知数值返回 `None`。
    pub const fn name(self) -> Option<&'static str> {
        match self {
            Self::NotSpecified => Some("SCOPE_NOT_SPECIFIED"),
            Self::Cluster => Some("SCOPE_CLUSTER"),
            Self::Node => Some("SCOPE_NODE"),
            Self::Other(_) => None,
        }
    }

    /// 按常量名查找。
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCOPE_NOT_SPECIFIED" => Some(Self::NotSpecified),
            "SCOPE_CLUSTER" => Some(Self::Cluster),
            "SCOPE_NODE" => Some(Self::Node),
            _ => None,
        }
    }

    /// URI 中使用的短标记：`cluster`/`node`/`default` 或数值。
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "cluster" => Some(Self::Cluster),
            "node" => Some(Self::Node),
            "default" => Some(Self::NotSpecified),
            other => parse_u32(other).map(Self::from_value),
        }
    }

    /// 地址类型在 URI 中省略作用域时所隐含的默认作用域。
    pub const fn implied_for(address_type: AddressType) -> Self {
        match address_type {
            AddressType::ServiceAddr | AddressType::ServiceRange => Self::Cluster,
            AddressType::SocketAddr | AddressType::Other(_) => Self::NotSpecified,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.value()),
            None => write!(f, "{}", self.value()),
        }
    }
}

/// 集群地址类型。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 三种原生地址（服务、服务区间、套接字引用）共享同一 20 字节布局，
///   仅靠首字段区分，字段 `a/b/c` 的含义随类型变化；
/// - 每个变体携带一个纯格式化函数 [`AddressType::format_fields`]，取代按实例注入策略对象的做法。
///
/// ## 契约（What）
/// - `ServiceRange = 1`：`a=type, b=lower, c=upper`；
/// - `ServiceAddr = 2`：`a=type, b=instance, c=domain`；
/// - `SocketAddr = 3`：`a=ref, b=nodeHash, c=0`；
/// - `Other(v)`：未知类型，字段按无符号十进制输出。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressType {
    ServiceRange,
    ServiceAddr,
    SocketAddr,
    Other(u32),
}

impl AddressType {
    /// 由线上数值构造。
    pub const fn from_value(value: u32) -> Self {
        match value {
            1 => Self::ServiceRange,
            2 => Self::ServiceAddr,
            3 => Self::SocketAddr,
            other => Self::Other(other),
        }
    }

    /// 返回线上数值。
    pub const fn value(self) -> u32 {
        match self {
            Self::ServiceRange => 1,
            Self::ServiceAddr => 2,
            Self::SocketAddr => 3,
            Self::Other(value) => value,
        }
    }

    /// 具名变体返回常量名；未知数值返回 `None`。
    pub const fn name(self) -> Option<&'static str> {
        match self {
            Self::ServiceRange => Some("SERVICE_RANGE"),
            Self::ServiceAddr => Some("SERVICE_ADDR"),
            Self::SocketAddr => Some("SOCKET_ADDR"),
            Self::Other(_) => None,
        }
    }

    /// 按常量名查找。
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SERVICE_RANGE" => Some(Self::ServiceRange),
            "SERVICE_ADDR" => Some(Self::ServiceAddr),
            "SOCKET_ADDR" => Some(Self::SocketAddr),
            _ => None,
        }
    }

    /// URI 中使用的短标记：`service`/`service-range`/`socket` 或数值。
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "service" => Some(Self::ServiceAddr),
            "service-range" => Some(Self::ServiceRange),
            "socket" => Some(Self::SocketAddr),
            other => parse_u32(other).map(Self::from_value),
        }
    }

    /// URI 中输出的短标记，未知类型返回 `None`。
    pub(crate) const fn token(self) -> Option<&'static str> {
        match self {
            Self::ServiceAddr => Some("service"),
            Self::ServiceRange => Some("service-range"),
            Self::SocketAddr => Some("socket"),
            Self::Other(_) => None,
        }
    }

    /// 按类型格式化三个字段，供调试输出使用。
    ///
    /// - `ServiceRange`：`0xA@0xB-0xC`；
    /// - `ServiceAddr`/`SocketAddr`：`0xA@0xB`，`c` 非零时追加 `:0xC`；
    /// - `Other`：`:a:b:c`（无符号十进制）。
    pub fn format_fields(self, a: u32, b: u32, c: u32) -> String {
        match self {
            Self::ServiceRange => {
                format!("{}@{}-{}", format_hex(a), format_hex(b), format_hex(c))
            }
            Self::ServiceAddr | Self::SocketAddr => {
                let mut out = format!("{}@{}", format_hex(a), format_hex(b));
                if c != 0 {
                    out.push(':');
                    out.push_str(&format_hex(c));
                }
                out
            }
            Self::Other(_) => format!(":{a}:{b}:{c}"),
        }
    }

    /// 带作用域的完整调试串：`NAME(value);scope:fields`。
    ///
    /// 套接字地址在作用域未声明时省略作用域段。
    pub fn debug_string(self, scope: Scope, a: u32, b: u32, c: u32) -> String {
        let head = match self.name() {
            Some(name) => format!("{name}({})", self.value()),
            None => self.value().to_string(),
        };
        let fields = self.format_fields(a, b, c);
        if self == Self::SocketAddr && scope == Scope::NotSpecified {
            format!("{head};{fields}")
        } else {
            format!("{head};{scope}:{fields}")
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.value()),
            None => write!(f, "{}", self.value()),
        }
    }
}
