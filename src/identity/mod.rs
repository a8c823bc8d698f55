use crate::config::TrustProxy;
use http::HeaderMap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::IpAddr;

/// Canonical identity of a traffic source for quota purposes.
///
/// String form is `<kind>:<value>` with `kind` one of `apikey`, `user`, `ip`.
/// API keys are stored as the first 16 hex characters of their SHA-256.
/// The raw key never leaves the process and never appears in logs or metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    pub fn api_key(raw: &str) -> Self {
        let digest = Sha256::digest(raw.as_bytes());
        let hex = hex::encode(digest);
        Principal(format!("apikey:{}", &hex[..16]))
    }

    pub fn user(id: &str) -> Self {
        Principal(format!("user:{}", id))
    }

    pub fn ip(addr: IpAddr) -> Self {
        Principal(format!("ip:{}", addr))
    }

    pub fn unknown() -> Self {
        Principal("ip:unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated subject placed in request extensions by an auth layer ahead
/// of the gate. The gateway itself performs no authentication.
#[derive(Debug, Clone)]
pub struct AuthSubject(pub String);

/// The request facts identification operates on, borrowed from the incoming
/// request so the chain is testable without a hyper server.
pub struct ClientHello<'a> {
    pub headers: &'a HeaderMap,
    pub query: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub peer: IpAddr,
}

/// One strategy in the identification chain. Static dispatch, exhaustive
/// match, evaluated in precedence order.
enum IdentitySource {
    ApiKey,
    Subject,
    ClientAddr,
}

/// Precedence: api key > authenticated subject > client address.
const CHAIN: [IdentitySource; 3] = [
    IdentitySource::ApiKey,
    IdentitySource::Subject,
    IdentitySource::ClientAddr,
];

impl IdentitySource {
    fn resolve(&self, hello: &ClientHello<'_>, trust: TrustProxy) -> Option<Principal> {
        match self {
            IdentitySource::ApiKey => {
                let key = header_str(hello.headers, "x-api-key")
                    .or_else(|| hello.query.and_then(|q| query_param(q, "api_key")))?;
                if key.is_empty() {
                    return None;
                }
                Some(Principal::api_key(key))
            }
            IdentitySource::Subject => {
                let id = hello.subject?;
                if id.is_empty() {
                    return None;
                }
                Some(Principal::user(id))
            }
            IdentitySource::ClientAddr => {
                client_addr(hello.headers, hello.peer, trust).map(Principal::ip)
            }
        }
    }
}

/// Derive the principal for a request. Never fails: a request whose address
/// cannot be determined degrades to the shared `ip:unknown` principal and
/// still participates in rate limiting, just more coarsely.
pub fn identify(hello: &ClientHello<'_>, trust: TrustProxy) -> Principal {
    for source in &CHAIN {
        if let Some(principal) = source.resolve(hello, trust) {
            return principal;
        }
    }
    Principal::unknown()
}

/// Resolve the client address under the proxy-trust policy.
///
/// With trust off, forwarding headers are attacker-controlled input and are
/// ignored entirely. With `hops(n)`, the n-th entry from the right of
/// `X-Forwarded-For` is the first address not appended by a trusted proxy.
/// With trust-all, the leftmost entry (or `X-Real-IP`) wins.
pub fn client_addr(headers: &HeaderMap, peer: IpAddr, trust: TrustProxy) -> Option<IpAddr> {
    match trust {
        TrustProxy::Off => valid_addr(peer),
        TrustProxy::All => {
            let forwarded = forwarded_entries(headers);
            forwarded
                .first()
                .and_then(|s| parse_addr(s))
                .or_else(|| header_str(headers, "x-real-ip").and_then(parse_addr))
                .or_else(|| valid_addr(peer))
        }
        TrustProxy::Hops(n) => {
            let forwarded = forwarded_entries(headers);
            if forwarded.is_empty() {
                return valid_addr(peer);
            }
            let n = n as usize;
            let idx = if n >= forwarded.len() { 0 } else { forwarded.len() - n };
            parse_addr(&forwarded[idx]).or_else(|| valid_addr(peer))
        }
    }
}

fn forwarded_entries(headers: &HeaderMap) -> Vec<String> {
    header_str(headers, "x-forwarded-for")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Minimal query-string scan. Values are used verbatim (an api key is opaque
/// either way), so no percent decoding is performed.
fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let mut it = pair.splitn(2, '=');
        match (it.next(), it.next()) {
            (Some(k), Some(v)) if k == name => Some(v),
            _ => None,
        }
    })
}

/// Parse a textual address, tolerating an attached port, and strip the
/// IPv4-mapped-IPv6 prefix so `::ffff:1.2.3.4` and `1.2.3.4` share a bucket.
fn parse_addr(s: &str) -> Option<IpAddr> {
    let s = s.trim();
    let ip = s
        .parse::<IpAddr>()
        .ok()
        .or_else(|| s.parse::<std::net::SocketAddr>().ok().map(|sa| sa.ip()))?;
    valid_addr(normalize(ip))
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

fn valid_addr(ip: IpAddr) -> Option<IpAddr> {
    let ip = normalize(ip);
    if ip.is_unspecified() {
        None
    } else {
        Some(ip)
    }
}
