//! Remote endpoint parsing

use ep_core::error::ForwardError;

/// Scheme prefix of Unix socket addresses
pub const UNIX_SCHEME: &str = "unix://";

/// Extract the socket path from a `unix://` address
pub fn parse_unix(address: &str) -> Result<&str, ForwardError> {
    let path = address
        .strip_prefix(UNIX_SCHEME)
        .ok_or_else(|| ForwardError::InvalidScheme(address.to_string()))?;

    if path.is_empty() {
        return Err(ForwardError::InvalidAddress {
            address: address.to_string(),
            reason: "empty socket path".to_string(),
        });
    }

    Ok(path)
}

/// Split a `host:port` or `[v6host]:port` address
pub fn split_host_port(address: &str) -> Result<(String, u16), ForwardError> {
    let invalid = |reason: &str| ForwardError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or_else(|| invalid("missing ']'"))?;
        let port = rest.strip_prefix(':').ok_or_else(|| invalid("missing port"))?;
        (host, port)
    } else {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        if host.contains(':') {
            return Err(invalid("too many colons"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| invalid("port is not a number between 0 and 65535"))?;

    Ok((host.to_string(), port))
}
