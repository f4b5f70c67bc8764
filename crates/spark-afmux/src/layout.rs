use core::fmt;
use std::path::{Path, PathBuf};

use crate::error::MuxError;
use crate::ports::PLAIN_FILE_SOCKET;

/// 默认套接字文件名前缀。
pub const DEFAULT_PREFIX: &str = "";
/// 默认套接字文件名后缀。
pub const DEFAULT_SUFFIX: &str = ".rmi";

/// 端口到套接字文件的映射规则。
///
/// 常规模式下端口 `p` 对应 `dir/prefix + p + suffix`；
/// 普通文件模式（注册表端口为 `PLAIN_FILE_SOCKET`）下所有端口都映射到 `dir` 本身。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocketLayout {
    dir: PathBuf,
    prefix: String,
    suffix: String,
    plain_file: bool,
}

impl SocketLayout {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        registry_port: i32,
    ) -> Result<Self, MuxError> {
        let dir = dir.into();
        let prefix = prefix.into();
        let suffix = suffix.into();
        if dir.as_os_str().is_empty() {
            return Err(MuxError::Config("socket directory must not be empty".to_owned()));
        }
        for (name, value) in [("prefix", &prefix), ("suffix", &suffix)] {
            if value.contains('/') || value.contains('\0') {
                return Err(MuxError::Config(format!("{name} {value:?} must be a plain file name part")));
            }
        }
        Ok(Self {
            dir,
            prefix,
            suffix,
            plain_file: registry_port == PLAIN_FILE_SOCKET,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn is_plain_file(&self) -> bool {
        self.plain_file
    }

    pub fn file_for(&self, port: i32) -> PathBuf {
        if self.plain_file {
            self.dir.clone()
        } else {
            self.dir.join(format!("{}{port}{}", self.prefix, self.suffix))
        }
    }
}

impl fmt::Display for SocketLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path={}", self.dir.display())?;
        if !self.plain_file {
            write!(f, ";prefix={};suffix={}", self.prefix, self.suffix)?;
        }
        Ok(())
    }
}
