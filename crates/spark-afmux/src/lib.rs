#![doc = r#"
# spark-afmux

## 设计动机（Why）
- **定位**：让大量远程调用服务共享同一个本地套接字目录，用数值端口区分各个服务，
  从而在不占用 TCP 端口的前提下复用远程调用运行时的“主机 + 端口”模型。
- **架构角色**：位于地址编解码（`spark-afaddr`）之上，向运行时提供客户端/服务端端点工厂、
  端口权威以及统一关闭能力。

## 核心契约（What）
- **端口语义**：`0` 表示向端口权威申请匿名端口；不低于 [`ports::AF_PORT_BASE`] 的端口由本 crate
  接管；更低的端口在配置了常规回退时交给 TCP；
- **文件映射**：端口 `p` 对应 `dir/prefix + p + suffix`，普通文件模式下所有端口映射到 `dir` 本身；
- **生命周期**：服务端关闭时删除套接字文件并归还匿名端口；工厂关闭幂等，可由
  [`ShutdownCoordinator`] 在退出时统一触发且不会延长工厂寿命；
- **错误**：所有失败以 [`MuxError`] 表达，附带稳定错误码。

## 实现策略（How）
- **执行框架**：Tokio `UnixStream`/`UnixListener`，系统调用集中在 [`LocalTransport`]；
- **登记表**：服务端、客户端、凭据三张表各自加锁，端点通过弱引用反向注销；
- **端口权威**：[`PortAssigner`] 异步 trait，提供进程内实现与基于本地套接字的远程实现；
- **外部记录**：工厂可编码为带版本号的二进制记录，在另一进程中经 [`NamingResolver`] 恢复。

## 风险与考量（Trade-offs）
- 工厂关闭时忽略端口权威不可达错误，范围覆盖所有服务端关闭；
- 抽象命名空间仅在 Linux 上可用，其余平台返回 [`MuxError::Unsupported`]。
"#]
#![deny(unsafe_code)]

pub mod assigner;
pub mod config;
pub mod conventional;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod layout;
pub mod naming;
pub mod ports;
pub mod record;
mod registry;
pub mod shutdown;
pub mod transport;

pub use assigner::{LocalPortAssigner, OpenPorts, PortAssigner, PortAuthorityServer, PortPool, RemotePortAssigner};
pub use config::MuxConfig;
pub use conventional::ConventionalFactory;
pub use credentials::{CredentialRegistry, HostAndPort, PeerCredentials};
pub use endpoint::{ClientEndpoint, Connection, MuxListener, MuxStream, ServerEndpoint};
pub use error::{MuxError, OperationKind};
pub use factory::{MuxSocketFactory, MuxSocketFactoryBuilder};
pub use layout::SocketLayout;
pub use naming::{CachingNamingResolver, Naming, NamingResolver, SocketNaming, StaticNaming};
pub use record::FactoryRecord;
pub use shutdown::{HookId, ShutdownCoordinator, ShutdownHook, ShutdownReport, ShutdownStatus};
pub use transport::{LocalTransport, TokioTransport};
