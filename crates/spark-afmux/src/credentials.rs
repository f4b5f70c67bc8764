use core::fmt;
use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

/// 对端进程凭据。
///
/// `pid` 在部分平台上不可得，此时为 `None`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerCredentials {
    pub pid: Option<i32>,
    pub uid: u32,
    pub gid: u32,
}

impl fmt::Display for PeerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "pid={pid};uid={};gid={}", self.uid, self.gid),
            None => write!(f, "uid={};gid={}", self.uid, self.gid),
        }
    }
}

/// 客户端连接时使用的主机名与端口。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostAndPort {
    pub host: String,
    pub port: i32,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: i32) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// `(host, port) → PeerCredentials` 映射，同一键后写覆盖先写。
#[derive(Debug, Default)]
pub struct CredentialRegistry {
    entries: Mutex<HashMap<HostAndPort, PeerCredentials>>,
}

impl CredentialRegistry {
    pub fn insert(&self, key: HostAndPort, credentials: PeerCredentials) -> Option<PeerCredentials> {
        let previous = self.entries.lock().insert(key.clone(), credentials);
        if let Some(previous) = previous {
            debug!(%key, %previous, current = %credentials, "peer credentials replaced");
        }
        previous
    }

    pub fn remove(&self, key: &HostAndPort) -> Option<PeerCredentials> {
        self.entries.lock().remove(key)
    }

    pub fn get(&self, key: &HostAndPort) -> Option<PeerCredentials> {
        self.entries.lock().get(key).copied()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let registry = CredentialRegistry::default();
        let key = HostAndPort::new("localhost", 100_001);
        let first = PeerCredentials {
            pid: Some(1),
            uid: 1000,
            gid: 1000,
        };
        let second = PeerCredentials { pid: None, ..first };
        assert_eq!(registry.insert(key.clone(), first), None);
        assert_eq!(registry.insert(key.clone(), second), Some(first));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&key), Some(second));
        assert_eq!(registry.remove(&key), Some(second));
        assert!(registry.is_empty());
    }

    #[test]
    fn display_omits_missing_pid() {
        let creds = PeerCredentials {
            pid: None,
            uid: 1,
            gid: 2,
        };
        assert_eq!(creds.to_string(), "uid=1;gid=2");
        assert_eq!(HostAndPort::new("h", 5).to_string(), "h:5");
    }
}
