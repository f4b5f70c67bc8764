use thiserror::Error;

/// 稳定错误码：地址字节序列为空。
pub const EMPTY_ADDRESS: &str = "spark.afaddr.empty_address";
/// 稳定错误码：描述符长度与地址族布局不符。
pub const INVALID_LENGTH: &str = "spark.afaddr.invalid_length";
/// 稳定错误码：端口越界（小于 `-1`）。
pub const PORT_OUT_OF_RANGE: &str = "spark.afaddr.port_out_of_range";
/// 稳定错误码：URI scheme 不受支持。
pub const UNSUPPORTED_SCHEME: &str = "spark.afaddr.unsupported_scheme";
/// 稳定错误码：URI 结构非法。
pub const MALFORMED_URI: &str = "spark.afaddr.malformed_uri";
/// 稳定错误码：尝试把其他地址族的地址解包为当前地址族。
pub const UNSUPPORTED_ADDRESS: &str = "spark.afaddr.unsupported_address";
/// 稳定错误码：地址不对应文件系统路径。
pub const NO_FILENAME: &str = "spark.afaddr.no_filename";

/// 地址编解码统一错误类型。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 地址在构造/解析阶段要么完整成功，要么以结构化错误拒绝，绝不返回“半成品”；
/// - 上层（如套接字工厂）需要区分“地址非法”与“IO 失败”，因此地址错误独立成枚举。
///
/// ## 契约（What）
/// - 除 [`AddressError::UnsupportedAddress`] 与 [`AddressError::NoFilename`] 外，
///   其余变体均属于“malformed address”一类，可用 [`AddressError::is_malformed`] 判定；
/// - [`AddressError::code`] 返回稳定错误码，便于日志与告警聚合。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// 字节序列为空。
    #[error("illegal address length: 0")]
    EmptyAddress,
    /// 字节序列长度不符合地址族布局。
    #[error("illegal {family} address length: expected {expected}, got {actual}")]
    InvalidLength {
        family: &'static str,
        expected: usize,
        actual: usize,
    },
    /// 端口小于 `-1`。
    #[error("port out of range: {0}")]
    PortOutOfRange(i32),
    /// URI scheme 不属于任何已注册地址族。
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
    /// URI 结构或字段非法。
    #[error("invalid {family} URI {uri:?}: {reason}")]
    MalformedUri {
        family: &'static str,
        uri: String,
        reason: String,
    },
    /// 地址族不匹配。
    #[error("unsupported address: expected {expected}, got {actual}")]
    UnsupportedAddress {
        expected: &'static str,
        actual: String,
    },
    /// 地址没有对应的文件名，例如位于抽象命名空间。
    #[error("no file: {0}")]
    NoFilename(&'static str),
}

impl AddressError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyAddress => EMPTY_ADDRESS,
            Self::InvalidLength { .. } => INVALID_LENGTH,
            Self::PortOutOfRange(_) => PORT_OUT_OF_RANGE,
            Self::UnsupportedScheme(_) => UNSUPPORTED_SCHEME,
            Self::MalformedUri { .. } => MALFORMED_URI,
            Self::UnsupportedAddress { .. } => UNSUPPORTED_ADDRESS,
            Self::NoFilename(_) => NO_FILENAME,
        }
    }

    /// 是否属于“地址格式非法”分类。
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::UnsupportedAddress { .. } | Self::NoFilename(_))
    }

    pub(crate) fn malformed_uri(
        family: &'static str,
        uri: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedUri {
            family,
            uri: uri.to_owned(),
            reason: reason.into(),
        }
    }
}

/// 校验端口范围；`-1` 表示“未指定”，`0` 表示“无端口”。
pub(crate) fn check_port(port: i32) -> Result<i32, AddressError> {
    if port < -1 {
        return Err(AddressError::PortOutOfRange(port));
    }
    Ok(port)
}
