use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{OpenPorts, PortAssigner};
use crate::error::MuxError;
use crate::ports::ANONYMOUS_PORT_BASE;

/// 进程内的端口池。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 分配从 `ANONYMOUS_PORT_BASE` 起向上扫描首个空闲端口，达到 `i32::MAX` 后回绕；
/// - 池耗尽或已关闭时返回 [`MuxError::Unavailable`]；
/// - 锁只覆盖集合操作本身，不跨越任何 `.await`。
///
/// ## 逻辑（How）
/// - `next` 记录下一次扫描的起点，避免刚归还的端口被立刻复用；
/// - `closed` 与集合放在同一把锁内，关闭与分配之间没有竞态窗口。
#[derive(Debug)]
pub struct PortPool {
    state: Mutex<PoolState>,
}

#[derive(Debug)]
struct PoolState {
    open: BTreeSet<i32>,
    next: i32,
    closed: bool,
}

impl Default for PortPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PortPool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                open: BTreeSet::new(),
                next: ANONYMOUS_PORT_BASE,
                closed: false,
            }),
        }
    }

    pub fn allocate(&self) -> Result<i32, MuxError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MuxError::Unavailable("port pool closed".to_owned()));
        }
        let capacity = i64::from(i32::MAX) - i64::from(ANONYMOUS_PORT_BASE) + 1;
        if state.open.len() as i64 >= capacity {
            return Err(MuxError::Unavailable("port pool exhausted".to_owned()));
        }
        let mut candidate = state.next;
        while state.open.contains(&candidate) {
            candidate = if candidate == i32::MAX {
                ANONYMOUS_PORT_BASE
            } else {
                candidate + 1
            };
        }
        state.open.insert(candidate);
        state.next = if candidate == i32::MAX {
            ANONYMOUS_PORT_BASE
        } else {
            candidate + 1
        };
        debug!(port = candidate, "anonymous port allocated");
        Ok(candidate)
    }

    /// 归还端口，返回该端口此前是否处于已分配状态。
    pub fn release(&self, port: i32) -> Result<bool, MuxError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MuxError::Unavailable("port pool closed".to_owned()));
        }
        let removed = state.open.remove(&port);
        if removed {
            debug!(port, "anonymous port returned");
        }
        Ok(removed)
    }

    pub fn snapshot(&self) -> Result<OpenPorts, MuxError> {
        let state = self.state.lock();
        if state.closed {
            return Err(MuxError::Unavailable("port pool closed".to_owned()));
        }
        Ok(OpenPorts::from_sorted(state.open.iter().copied().collect()))
    }

    /// 关闭端口池，之后的所有操作都返回 `Unavailable`。
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.open.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// 直接持有 [`PortPool`] 的进程内端口权威。
#[derive(Debug, Clone, Default)]
pub struct LocalPortAssigner {
    pool: Arc<PortPool>,
}

impl LocalPortAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(pool: Arc<PortPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<PortPool> {
        &self.pool
    }
}

#[async_trait]
impl PortAssigner for LocalPortAssigner {
    async fn new_port(&self) -> Result<i32, MuxError> {
        self.pool.allocate()
    }

    async fn return_port(&self, port: i32) -> Result<(), MuxError> {
        self.pool.release(port).map(|_| ())
    }

    async fn open_ports(&self) -> Result<OpenPorts, MuxError> {
        self.pool.snapshot()
    }
}
