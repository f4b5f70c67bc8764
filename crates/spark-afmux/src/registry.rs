use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::credentials::{CredentialRegistry, HostAndPort};
use crate::endpoint::{ListenerShared, StreamShared};

/// 工厂持有的三张登记表。
///
/// # 契约（What）
/// - 每张表各用一把锁，锁只在插入/删除/快照期间持有，不跨越 `.await`；
/// - 同一端口至多登记一个存活的服务端，新登记替换旧登记；
/// - 端点通过 `Weak<Registries>` 反向注销，工厂被丢弃后注销自然变为空操作。
#[derive(Debug, Default)]
pub(crate) struct Registries {
    pub credentials: CredentialRegistry,
    servers: Mutex<HashMap<i32, Arc<ListenerShared>>>,
    clients: Mutex<HashMap<u64, Arc<StreamShared>>>,
}

impl Registries {
    pub fn register_server(&self, port: i32, server: Arc<ListenerShared>) {
        let previous = self.servers.lock().insert(port, server);
        match previous {
            Some(previous) if !previous.is_closed() => {
                warn!(port, "server registration replaced a live server");
            }
            _ => debug!(port, "server registered"),
        }
    }

    /// 注销端口，仅当登记的仍是同一服务端时才移除。
    pub fn unregister_server(&self, port: i32, server: &ListenerShared) {
        let mut servers = self.servers.lock();
        if servers
            .get(&port)
            .is_some_and(|current| core::ptr::eq(Arc::as_ptr(current), server))
        {
            servers.remove(&port);
            debug!(port, "server unregistered");
        }
    }

    pub fn has_server(&self, port: i32) -> bool {
        self.servers.lock().contains_key(&port)
    }

    pub fn server_ports(&self) -> Vec<i32> {
        let mut ports: Vec<i32> = self.servers.lock().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    pub fn drain_servers(&self) -> Vec<Arc<ListenerShared>> {
        self.servers.lock().drain().map(|(_, server)| server).collect()
    }

    pub fn register_client(&self, client: Arc<StreamShared>) {
        let id = client.id();
        self.clients.lock().insert(id, client);
        debug!(client = id, "client registered");
    }

    /// 注销客户端并移除其凭据记录。
    pub fn unregister_client(&self, id: u64, key: &HostAndPort) {
        if self.clients.lock().remove(&id).is_some() {
            debug!(client = id, %key, "client unregistered");
        }
        self.credentials.remove(key);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn drain_clients(&self) -> Vec<Arc<StreamShared>> {
        self.clients.lock().drain().map(|(_, client)| client).collect()
    }
}
