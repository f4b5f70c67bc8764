//! 进程退出前的统一关闭。
//!
//! # 教案式导航
//! - **定位（Where）**：由持有工厂的上下文（宿主、测试夹具）创建并持有 [`ShutdownCoordinator`]；
//! - **动机（Why）**：工厂持有套接字文件与端口，需要在退出时清理；但协调器不能延长工厂寿命，
//!   否则无人使用的工厂会一直驻留；
//! - **做法（How）**：协调器只保存 `Weak<dyn ShutdownHook>`，工厂在构造时登记、显式关闭时注销；
//!   [`ShutdownCoordinator::shutdown`] 逐个执行仍然存活的钩子，失败只记录不中断。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::MuxError;

/// 关闭钩子。
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    /// 日志与报告中使用的稳定标识。
    fn label(&self) -> String;

    /// 尽力关闭；错误由协调器记录。
    async fn on_shutdown(&self) -> Result<(), MuxError>;
}

/// 登记凭证，用于注销。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

/// 单个钩子的执行结果。
#[derive(Debug)]
#[non_exhaustive]
pub enum ShutdownStatus {
    Completed,
    Failed(MuxError),
}

/// 单个钩子的关闭摘要。
#[derive(Debug)]
pub struct ShutdownRecord {
    label: String,
    status: ShutdownStatus,
    elapsed: Duration,
}

impl ShutdownRecord {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> &ShutdownStatus {
        &self.status
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// 一次关闭的汇总报告，按登记顺序排列。
#[derive(Debug, Default)]
pub struct ShutdownReport {
    records: Vec<ShutdownRecord>,
    pruned: usize,
}

impl ShutdownReport {
    pub fn records(&self) -> &[ShutdownRecord] {
        &self.records
    }

    /// 执行时已被丢弃、因而跳过的钩子数量。
    pub fn pruned(&self) -> usize {
        self.pruned
    }

    pub fn failures(&self) -> usize {
        self.records
            .iter()
            .filter(|record| matches!(record.status, ShutdownStatus::Failed(_)))
            .count()
    }
}

/// 弱引用关闭钩子的登记表。
///
/// # 契约（What）
/// - [`ShutdownCoordinator::register`] 不增加钩子的强引用计数；
/// - 已被丢弃的钩子在 [`ShutdownCoordinator::live_hooks`] 与 `shutdown` 时被清理；
/// - `shutdown` 清空登记表，之后可继续登记新的钩子。
#[derive(Default)]
pub struct ShutdownCoordinator {
    next_id: AtomicU64,
    hooks: Mutex<BTreeMap<HookId, Weak<dyn ShutdownHook>>>,
}

impl core::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("registered", &self.hooks.lock().len())
            .finish()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, hook: Weak<dyn ShutdownHook>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.lock().insert(id, hook);
        debug!(hook = id.0, "shutdown hook registered");
        id
    }

    /// 注销钩子，返回其此前是否仍在登记表中。
    pub fn deregister(&self, id: HookId) -> bool {
        let removed = self.hooks.lock().remove(&id).is_some();
        if removed {
            debug!(hook = id.0, "shutdown hook deregistered");
        }
        removed
    }

    /// 当前存活的钩子数量，顺带清理已丢弃的条目。
    pub fn live_hooks(&self) -> usize {
        let mut hooks = self.hooks.lock();
        hooks.retain(|_, hook| hook.strong_count() > 0);
        hooks.len()
    }

    /// 依登记顺序执行所有存活钩子。
    pub async fn shutdown(&self) -> ShutdownReport {
        let hooks = core::mem::take(&mut *self.hooks.lock());
        let mut report = ShutdownReport::default();
        for (id, hook) in hooks {
            let Some(hook) = hook.upgrade() else {
                report.pruned += 1;
                continue;
            };
            let label = hook.label();
            let started = Instant::now();
            let status = match hook.on_shutdown().await {
                Ok(()) => ShutdownStatus::Completed,
                Err(err) => {
                    warn!(hook = id.0, %label, error = %err, code = err.code(), "shutdown hook failed");
                    ShutdownStatus::Failed(err)
                }
            };
            report.records.push(ShutdownRecord {
                label,
                status,
                elapsed: started.elapsed(),
            });
        }
        info!(
            completed = report.records.len() - report.failures(),
            failed = report.failures(),
            pruned = report.pruned,
            "shutdown hooks finished"
        );
        report
    }
}
