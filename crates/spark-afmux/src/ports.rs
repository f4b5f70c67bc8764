//! 端口号空间的约定常量。
//!
//! | 区间 | 归属 |
//! |------|------|
//! | `0` | 请求匿名分配 |
//! | `1 ..< AF_PORT_BASE` | 配置了常规工厂时交给常规工厂 |
//! | `AF_PORT_BASE ..< ANONYMOUS_PORT_BASE` | 多路复用器的固定端口 |
//! | `ANONYMOUS_PORT_BASE ..= i32::MAX` | 端口权威动态分配 |

/// 默认注册表端口。
pub const DEFAULT_REGISTRY_PORT: i32 = 1099;

/// 多路复用器接管的最小端口。
pub const AF_PORT_BASE: i32 = 100_000;

/// 匿名端口的分配起点。
pub const ANONYMOUS_PORT_BASE: i32 = 110_000;

/// 请求匿名分配的端口号。
pub const ANONYMOUS_PORT: i32 = 0;

/// 作为注册表端口时表示“普通文件模式”：目录路径本身就是唯一的套接字文件。
pub const PLAIN_FILE_SOCKET: i32 = -2;

/// 端口是否归多路复用器所有。
pub const fn is_multiplexed(port: i32) -> bool {
    port >= AF_PORT_BASE
}
