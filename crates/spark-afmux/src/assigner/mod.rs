//! 端口权威：为共享同一套接字目录的多个服务分配匿名端口。
//!
//! # 教案式导航
//! - **契约（What）**：[`PortAssigner`] 只有三个操作，分配、归还、枚举；
//!   归还未知端口是空操作，权威不可达统一报告为 [`MuxError::Unavailable`]；
//! - **实现（How）**：[`LocalPortAssigner`] 在进程内直接操作 [`PortPool`]，
//!   [`RemotePortAssigner`] 通过本地套接字访问由 [`PortAuthorityServer`] 托管的同一池；
//! - **并发（Concurrency）**：调用方不在本地串行化分配，互斥由权威自身保证。

mod pool;
mod remote;

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MuxError;

pub use pool::{LocalPortAssigner, PortPool};
pub use remote::{PortAuthorityServer, RemotePortAssigner};

/// 端口权威的抽象。
#[async_trait]
pub trait PortAssigner: Send + Sync + fmt::Debug {
    /// 分配一个当前未被占用的端口。
    async fn new_port(&self) -> Result<i32, MuxError>;

    /// 归还端口；未分配过的端口被忽略。
    async fn return_port(&self, port: i32) -> Result<(), MuxError>;

    /// 当前已分配端口的快照。
    async fn open_ports(&self) -> Result<OpenPorts, MuxError>;
}

/// 已分配端口的有限快照。
///
/// 快照在创建后不再变化，可反复遍历，遍历顺序升序。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenPorts {
    ports: Arc<[i32]>,
}

impl OpenPorts {
    pub(crate) fn from_sorted(ports: Vec<i32>) -> Self {
        Self {
            ports: ports.into(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.ports.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn contains(&self, port: i32) -> bool {
        self.ports.binary_search(&port).is_ok()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.ports
    }
}

impl<'a> IntoIterator for &'a OpenPorts {
    type Item = i32;
    type IntoIter = core::iter::Copied<core::slice::Iter<'a, i32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ports.iter().copied()
    }
}
