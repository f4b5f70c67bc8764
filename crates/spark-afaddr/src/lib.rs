#![doc = r#"
# spark-afaddr

## 模块使命（Why）
- **统一地址抽象**：本地（Unix 域）套接字与集群消息套接字的地址形态各异，上层多路复用器只需面对一个 [`SocketAddress`]。
- **可逆表示**：每个地址都能在“原始描述符字节”“URI 文本”“主机名 + 端口包装”三种形式间无损往返，便于日志、配置与只认识主机名的上层 API 透传。

## 核心契约（What）
- 描述符字节在构造后不可变；集群地址固定 20 字节 `[type, scope, a, b, c]`（大端）。
- 解析失败一律返回 [`AddressError`]，并通过 [`AddressError::is_malformed`] 区分“格式非法”与“地址族不匹配”。
- 地址族集合由 [`AddressFamilyRegistry`] 显式持有，调用方构造一次后传递，不依赖进程级全局状态。

## 实现策略（How）
- 作用域与地址类型建模为闭合枚举加 `Other(u32)` 兜底，格式化为挂在变体上的纯函数。
- URI 拆分与集群地址解析均为纯字节扫描，不引入正则表达式。
- 字节编解码使用 `bytes` 的 `Buf`/`BufMut`，包装主机名使用 `hex`。
"#]
#![deny(unsafe_code)]

pub mod error;
pub mod family;
pub mod kind;
pub mod tipc;
pub mod unix;
mod uri;
pub mod wrap;

pub use error::AddressError;
pub use family::{AddressFamily, AddressFamilyRegistry, SocketAddress};
pub use kind::{AddressType, Scope, format_hex};
pub use tipc::{TipcFields, TipcSocketAddress};
pub use unix::UnixSocketAddress;
pub use wrap::WrappedAddress;
