//! Client address resolution through trusted forwarding proxies.
//!
//! The resolver decides which address a request is evaluated as:
//!
//! 1. If the immediate peer is a trusted forwarder, the client address is read
//!    from the configured forwarding header. The header chain is walked from
//!    the right, skipping trusted forwarders; the first untrusted hop is the
//!    client. When every hop is trusted the leftmost entry is used.
//! 2. Otherwise the peer address is the client.
//!
//! The resolved address is then matched against the trusted-client list.
//! Any malformed input is an error; callers must deny rather than guess.

use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;
use thiserror::Error;

/// Header name used when none is configured.
pub const DEFAULT_FORWARDED_HEADER: &str = "X-Forwarded-For";

/// Trust resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    /// A configured trusted entry is neither an IP nor a CIDR.
    #[error("invalid trusted entry {0:?}")]
    InvalidEntry(String),

    /// The peer is a trusted forwarder but sent no forwarding header.
    #[error("missing {0} header from trusted forwarder")]
    MissingHeader(String),

    /// The forwarding header could not be parsed.
    #[error("malformed {header} header: {value:?}")]
    MalformedHeader { header: String, value: String },
}

/// Set of trusted networks.
#[derive(Debug, Clone, Default)]
pub struct IpChecker {
    nets: Vec<IpNet>,
}

impl IpChecker {
    /// Builds a checker from IP or CIDR strings.
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Result<Self, TrustError> {
        let mut nets = Vec::with_capacity(entries.len());
        for raw in entries {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            nets.push(parse_trusted_entry(raw)?);
        }
        Ok(Self { nets })
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    /// Returns true if `ip` falls in any trusted network.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.nets.iter().any(|net| net.contains(&ip))
    }
}

fn parse_trusted_entry(raw: &str) -> Result<IpNet, TrustError> {
    if let Ok(net) = raw.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    raw.parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| TrustError::InvalidEntry(raw.to_string()))
}

/// Address a request is evaluated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIdentity {
    pub ip: IpAddr,
    /// The address is on the trusted-client list.
    pub trusted: bool,
}

/// Resolves the client identity of a request.
#[derive(Debug, Clone)]
pub struct TrustResolver {
    forwarders: IpChecker,
    clients: IpChecker,
    header: String,
}

impl TrustResolver {
    /// Creates a resolver from the configured lists and header name.
    pub fn new<S: AsRef<str>>(
        trusted_forwarders: &[S],
        trusted_clients: &[S],
        header: impl Into<String>,
    ) -> Result<Self, TrustError> {
        let header = header.into();
        Ok(Self {
            forwarders: IpChecker::new(trusted_forwarders)?,
            clients: IpChecker::new(trusted_clients)?,
            header: if header.trim().is_empty() {
                DEFAULT_FORWARDED_HEADER.to_string()
            } else {
                header
            },
        })
    }

    /// Name of the forwarding header consulted for trusted peers.
    pub fn header_name(&self) -> &str {
        &self.header
    }

    /// Resolves the client address for a request from `peer`.
    ///
    /// `header_value` holds the forwarding header, with repeated headers
    /// joined by `,`.
    pub fn resolve(
        &self,
        peer: IpAddr,
        header_value: Option<&str>,
    ) -> Result<ClientIdentity, TrustError> {
        let peer = peer.to_canonical();
        let ip = if self.forwarders.contains(peer) {
            self.client_from_header(header_value)?
        } else {
            peer
        };

        Ok(ClientIdentity {
            ip,
            trusted: self.clients.contains(ip),
        })
    }

    fn client_from_header(&self, header_value: Option<&str>) -> Result<IpAddr, TrustError> {
        let value = header_value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TrustError::MissingHeader(self.header.clone()))?;

        let malformed = || TrustError::MalformedHeader {
            header: self.header.clone(),
            value: value.to_string(),
        };

        let hops = if self.header.eq_ignore_ascii_case("forwarded") {
            forwarded_for_hops(value)
        } else {
            value
                .split(',')
                .map(str::trim)
                .filter(|hop| !hop.is_empty())
                .map(str::to_string)
                .collect()
        };

        let addresses = hops
            .iter()
            .map(|hop| parse_hop(hop).ok_or_else(malformed))
            .collect::<Result<Vec<_>, _>>()?;

        let leftmost = *addresses.first().ok_or_else(malformed)?;
        Ok(addresses
            .iter()
            .rev()
            .copied()
            .find(|ip| !self.forwarders.contains(*ip))
            .unwrap_or(leftmost))
    }
}

/// Extracts the `for=` parameters of an RFC 7239 `Forwarded` header.
fn forwarded_for_hops(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|pair| {
                let (key, val) = pair.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("for")
                    .then(|| val.trim().trim_matches('"').to_string())
            })
        })
        .collect()
}

/// Parses a hop as a bare IP, `ip:port`, or `[v6]:port`.
fn parse_hop(hop: &str) -> Option<IpAddr> {
    if let Ok(ip) = hop.parse::<IpAddr>() {
        return Some(ip.to_canonical());
    }
    if let Ok(addr) = hop.parse::<SocketAddr>() {
        return Some(addr.ip().to_canonical());
    }
    hop.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .and_then(|h| h.parse::<IpAddr>().ok())
        .map(|ip| ip.to_canonical())
}
