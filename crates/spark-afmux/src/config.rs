//! 多路复用工厂的 TOML 配置。
//!
//! ```toml
//! socket_dir = "/run/app/rmi"
//! prefix = ""
//! suffix = ".rmi"
//! registry_port = 1099
//! conventional_host = "127.0.0.1"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::conventional::ConventionalFactory;
use crate::error::{self, MuxError, map_io_error};
use crate::layout::{DEFAULT_PREFIX, DEFAULT_SUFFIX, SocketLayout};
use crate::ports::DEFAULT_REGISTRY_PORT;

/// 工厂配置。
///
/// # 契约（What）
/// - `socket_dir` 必填且非空；
/// - `prefix`/`suffix` 缺省为 `""`/`".rmi"`，不得包含路径分隔符；
/// - `registry_port` 缺省为 `1099`，取 `-2` 表示普通文件模式；
/// - `conventional_host` 存在时，低端口同时启用客户端与服务端的 TCP 回退。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MuxConfig {
    pub socket_dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    #[serde(default = "default_registry_port")]
    pub registry_port: i32,
    #[serde(default)]
    pub conventional_host: Option<String>,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_owned()
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_owned()
}

fn default_registry_port() -> i32 {
    DEFAULT_REGISTRY_PORT
}

impl MuxConfig {
    /// 以目录与默认值构造。
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            prefix: default_prefix(),
            suffix: default_suffix(),
            registry_port: default_registry_port(),
            conventional_host: None,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, MuxError> {
        let config: Self = toml::from_str(text).map_err(|err| MuxError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MuxError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|err| map_io_error(error::CONFIG_READ, err))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), MuxError> {
        self.layout().map(|_| ())
    }

    pub fn layout(&self) -> Result<SocketLayout, MuxError> {
        SocketLayout::new(
            self.socket_dir.clone(),
            self.prefix.clone(),
            self.suffix.clone(),
            self.registry_port,
        )
    }

    pub fn conventional(&self) -> Option<ConventionalFactory> {
        self.conventional_host.as_deref().map(ConventionalFactory::new)
    }
}
