//! Parsing of `host[:port]@remotePath` destination arguments

use crate::error::{Result, SyncError};
use crate::protocol::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDest {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Split a destination argument at the first `@`. Hosts never contain `@`; paths may.
/// IPv6 hosts with a port are written in brackets: `[::1]:9000@/srv/dest`.
pub fn parse_remote_dest(arg: &str) -> Result<RemoteDest> {
    let arg = arg.trim();
    let (hp, path) = arg
        .split_once('@')
        .ok_or_else(|| SyncError::Config(format!("destination {:?} is not host@path", arg)))?;
    if hp.is_empty() {
        return Err(SyncError::Config("destination host is empty".into()));
    }
    if path.is_empty() {
        return Err(SyncError::Config("destination path is empty".into()));
    }

    let (host, port) = if let Some(rest) = hp.strip_prefix('[') {
        let (h, tail) = rest
            .split_once(']')
            .ok_or_else(|| SyncError::Config(format!("unterminated IPv6 host in {:?}", hp)))?;
        match tail.strip_prefix(':') {
            Some(p) => (h.to_string(), parse_port(p)?),
            None if tail.is_empty() => (h.to_string(), DEFAULT_PORT),
            None => return Err(SyncError::Config(format!("bad host {:?}", hp))),
        }
    } else if hp.matches(':').count() == 1 {
        let (h, p) = hp.split_once(':').unwrap_or((hp, ""));
        (h.to_string(), parse_port(p)?)
    } else {
        // Bare hostname, IPv4, or unbracketed IPv6
        (hp.to_string(), DEFAULT_PORT)
    };

    Ok(RemoteDest {
        host,
        port,
        path: path.to_string(),
    })
}

fn parse_port(p: &str) -> Result<u16> {
    p.parse()
        .map_err(|_| SyncError::Config(format!("invalid port {:?}", p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_path() {
        let d = parse_remote_dest("backup.lan@/srv/mirror").unwrap();
        assert_eq!(d.host, "backup.lan");
        assert_eq!(d.port, DEFAULT_PORT);
        assert_eq!(d.path, "/srv/mirror");
    }

    #[test]
    fn test_host_port_and_path() {
        let d = parse_remote_dest("127.0.0.1:9100@dest").unwrap();
        assert_eq!(d.host, "127.0.0.1");
        assert_eq!(d.port, 9100);
        assert_eq!(d.path, "dest");
    }

    #[test]
    fn test_path_may_contain_at() {
        let d = parse_remote_dest("h@/data/user@example").unwrap();
        assert_eq!(d.host, "h");
        assert_eq!(d.path, "/data/user@example");
    }

    #[test]
    fn test_ipv6() {
        let d = parse_remote_dest("[::1]:9000@/x").unwrap();
        assert_eq!(d.host, "::1");
        assert_eq!(d.port, 9000);
        let d = parse_remote_dest("::1@/x").unwrap();
        assert_eq!(d.host, "::1");
        assert_eq!(d.port, DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_specs() {
        assert!(parse_remote_dest("/just/a/path").is_err());
        assert!(parse_remote_dest("@/x").is_err());
        assert!(parse_remote_dest("host@").is_err());
        assert!(parse_remote_dest("host:notaport@/x").is_err());
    }
}
