//! 工厂的外部记录：跨进程传递“如何连到这个多路复用目录”。
//!
//! # 线上格式（大端）
//!
//! ```text
//! [version:u8 = 1]
//! [socket_dir:UTF]
//! [registry_port:i32]
//! [client_factory:FACTORY]
//! [server_factory:FACTORY]
//! [prefix:UTF]
//! [suffix:UTF]
//!
//! UTF     = [len:u16][UTF-8 bytes]
//! FACTORY = [tag:u8 = 0]                 无常规回退
//!         | [tag:u8 = 1][host:UTF]       TCP 回退
//! ```

use std::path::PathBuf;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::conventional::ConventionalFactory;
use crate::error::MuxError;

/// 当前记录版本。
pub const RECORD_VERSION: u8 = 1;

const FACTORY_NONE: u8 = 0;
const FACTORY_TCP: u8 = 1;

/// 解码后的工厂记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FactoryRecord {
    pub socket_dir: PathBuf,
    pub registry_port: i32,
    pub client_factory: Option<ConventionalFactory>,
    pub server_factory: Option<ConventionalFactory>,
    pub prefix: String,
    pub suffix: String,
}

impl FactoryRecord {
    pub fn encode(&self) -> Result<Bytes, MuxError> {
        let dir = self
            .socket_dir
            .to_str()
            .ok_or_else(|| MuxError::Record(format!("socket directory {:?} is not UTF-8", self.socket_dir)))?;
        let mut out = BytesMut::with_capacity(64 + dir.len());
        out.put_u8(RECORD_VERSION);
        put_utf(&mut out, dir)?;
        out.put_i32(self.registry_port);
        put_factory(&mut out, self.client_factory.as_ref())?;
        put_factory(&mut out, self.server_factory.as_ref())?;
        put_utf(&mut out, &self.prefix)?;
        put_utf(&mut out, &self.suffix)?;
        Ok(out.freeze())
    }

    pub fn decode(mut input: &[u8]) -> Result<Self, MuxError> {
        let version = get_u8(&mut input)?;
        if version != RECORD_VERSION {
            return Err(MuxError::Record(format!("unsupported record version {version}")));
        }
        let socket_dir = PathBuf::from(get_utf(&mut input)?);
        if input.remaining() < 4 {
            return Err(truncated());
        }
        let registry_port = input.get_i32();
        let client_factory = get_factory(&mut input)?;
        let server_factory = get_factory(&mut input)?;
        let prefix = get_utf(&mut input)?;
        let suffix = get_utf(&mut input)?;
        if input.has_remaining() {
            return Err(MuxError::Record(format!("{} trailing bytes", input.remaining())));
        }
        Ok(Self {
            socket_dir,
            registry_port,
            client_factory,
            server_factory,
            prefix,
            suffix,
        })
    }
}

fn truncated() -> MuxError {
    MuxError::Record("truncated record".to_owned())
}

fn put_utf(out: &mut BytesMut, value: &str) -> Result<(), MuxError> {
    let len = u16::try_from(value.len())
        .map_err(|_| MuxError::Record(format!("string of {} bytes too long", value.len())))?;
    out.put_u16(len);
    out.put_slice(value.as_bytes());
    Ok(())
}

fn put_factory(out: &mut BytesMut, factory: Option<&ConventionalFactory>) -> Result<(), MuxError> {
    match factory {
        None => out.put_u8(FACTORY_NONE),
        Some(factory) => {
            out.put_u8(FACTORY_TCP);
            put_utf(out, factory.host())?;
        }
    }
    Ok(())
}

fn get_u8(input: &mut &[u8]) -> Result<u8, MuxError> {
    if !input.has_remaining() {
        return Err(truncated());
    }
    Ok(input.get_u8())
}

fn get_utf(input: &mut &[u8]) -> Result<String, MuxError> {
    if input.remaining() < 2 {
        return Err(truncated());
    }
    let len = usize::from(input.get_u16());
    if input.remaining() < len {
        return Err(truncated());
    }
    let raw = input.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|err| MuxError::Record(err.to_string()))
}

fn get_factory(input: &mut &[u8]) -> Result<Option<ConventionalFactory>, MuxError> {
    match get_u8(input)? {
        FACTORY_NONE => Ok(None),
        FACTORY_TCP => Ok(Some(ConventionalFactory::new(get_utf(input)?))),
        other => Err(MuxError::Record(format!("unknown factory tag {other}"))),
    }
}
