//! 最小 URI 拆分与百分号编解码。
//!
//! 只覆盖地址族需要的子集：`scheme://[user@]host[:port][/path]`，
//! 不处理 query/fragment 的语义，遇到即截断。

use crate::error::AddressError;

/// 拆分后的 URI 视图，所有字段借用原串。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UriParts<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    pub port: Option<i32>,
    pub path: &'a str,
}

impl<'a> UriParts<'a> {
    /// 拆分 `scheme://[user@]host[:port][/path]`。
    pub fn split(uri: &'a str, family: &'static str) -> Result<Self, AddressError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| AddressError::malformed_uri(family, uri, "missing \"://\""))?;
        if scheme.is_empty()
            || !scheme
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.'))
        {
            return Err(AddressError::malformed_uri(family, uri, "invalid scheme"));
        }

        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let host_and_port = match authority.rsplit_once('@') {
            Some((_, tail)) => tail,
            None => authority,
        };
        let (host, port) = match host_and_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<i32>()
                    .ok()
                    .filter(|p| *p >= 0 && port.bytes().all(|b| b.is_ascii_digit()))
                    .ok_or_else(|| AddressError::malformed_uri(family, uri, "invalid port"))?;
                (host, Some(port))
            }
            None => (host_and_port, None),
        };

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    /// 仅提取 scheme，不校验其余部分。
    pub fn scheme_of(uri: &str) -> Option<&str> {
        uri.split_once("://").map(|(scheme, _)| scheme)
    }
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

/// 百分号编码；`keep` 中的字节原样保留。
pub(crate) fn percent_encode(bytes: &[u8], keep: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        if is_unreserved(b) || keep.contains(&b) {
            out.push(char::from(b));
        } else {
            out.push('%');
            out.push_str(&hex::encode_upper([b]));
        }
    }
    out
}

/// 百分号解码为原始字节。
pub(crate) fn percent_decode(text: &str) -> Option<Vec<u8>> {
    let raw = text.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut idx = 0;
    while idx < raw.len() {
        if raw[idx] == b'%' {
            let pair = raw.get(idx + 1..idx + 3)?;
            let mut byte = [0u8; 1];
            hex::decode_to_slice(pair, &mut byte).ok()?;
            out.push(byte[0]);
            idx += 3;
        } else {
            out.push(raw[idx]);
            idx += 1;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_userinfo_port_and_path() {
        let parts = UriParts::split("http+unix://me@%2Ftmp%2Fs:42/index", "un").unwrap();
        assert_eq!(parts.scheme, "http+unix");
        assert_eq!(parts.host, "%2Ftmp%2Fs");
        assert_eq!(parts.port, Some(42));
        assert_eq!(parts.path, "/index");
    }

    #[test]
    fn empty_authority_keeps_path() {
        let parts = UriParts::split("unix:///var/run/x.sock?q#f", "un").unwrap();
        assert_eq!(parts.host, "");
        assert_eq!(parts.port, None);
        assert_eq!(parts.path, "/var/run/x.sock");
    }

    #[test]
    fn rejects_bad_ports_and_schemes() {
        assert!(UriParts::split("tipc://1.1:x", "tipc").is_err());
        assert!(UriParts::split("tipc://1.1:-3", "tipc").is_err());
        assert!(UriParts::split("TIPC://1.1", "tipc").is_err());
        assert!(UriParts::split("1.1", "tipc").is_err());
    }

    #[test]
    fn percent_codec_handles_nul_and_slash() {
        let encoded = percent_encode(b"\0abc/d e", b"");
        assert_eq!(encoded, "%00abc%2Fd%20e");
        assert_eq!(percent_decode(&encoded).unwrap(), b"\0abc/d e");
        assert_eq!(percent_decode("%2"), None);
        assert_eq!(percent_decode("%zz"), None);
    }
}
