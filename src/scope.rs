//! Target scope validation
//!
//! Only private and loopback IPv4 ranges may be touched. The check runs for
//! every target on every call; results are never cached because targets come
//! straight from the operator.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tracing::warn;

use crate::error::CtfKitError;
use crate::sink::{note, ResultSink, Severity};

/// Sink category for scope decisions
pub const SCOPE_CATEGORY: &str = "scope";

/// Authorized ranges as `(network, prefix length)`
pub const AUTHORIZED_RANGES: [(Ipv4Addr, u8); 4] = [
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
];

/// IP family of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A target that passed [`ScopeGuard::authorize`].
///
/// Only the guard can build one, so holding it proves the check ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedTarget {
    address: String,
    ip: IpAddr,
}

impl AuthorizedTarget {
    /// The address as the operator supplied it (trimmed)
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn family(&self) -> AddressFamily {
        match self.ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl fmt::Display for AuthorizedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Why a target was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not an IP address literal
    InvalidAddress,
    /// Valid address outside every authorized range
    PublicAddress,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidAddress => f.write_str("invalid address"),
            RejectReason::PublicAddress => f.write_str("public address"),
        }
    }
}

/// Outcome of a scope check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Authorized(AuthorizedTarget),
    Rejected { target: String, reason: RejectReason },
}

impl Authorization {
    /// Convert into a `Result`, mapping rejection to [`CtfKitError::ScopeViolation`]
    pub fn into_result(self) -> crate::error::Result<AuthorizedTarget> {
        match self {
            Authorization::Authorized(target) => Ok(target),
            Authorization::Rejected { target, reason } => Err(CtfKitError::ScopeViolation {
                target,
                reason: reason.to_string(),
            }),
        }
    }
}

/// Whether an address falls inside one of [`AUTHORIZED_RANGES`].
///
/// IPv4-mapped IPv6 addresses are judged by their IPv4 part; every other
/// IPv6 address is out of scope.
pub fn in_authorized_range(ip: IpAddr) -> bool {
    let v4 = match ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4,
            None => return false,
        },
    };

    let bits = u32::from(v4);
    AUTHORIZED_RANGES.iter().any(|(network, prefix)| {
        let mask = u32::MAX << (32 - u32::from(*prefix));
        bits & mask == u32::from(*network) & mask
    })
}

/// Validates targets against the authorized ranges and records every refusal
#[derive(Clone)]
pub struct ScopeGuard {
    sink: Arc<dyn ResultSink>,
}

impl ScopeGuard {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self { sink }
    }

    /// Check a raw target string.
    ///
    /// A rejection is appended to the sink before it is returned.
    pub async fn authorize(&self, raw: &str) -> Authorization {
        let address = raw.trim();

        let reason = match address.parse::<IpAddr>() {
            Ok(ip) if in_authorized_range(ip) => {
                return Authorization::Authorized(AuthorizedTarget {
                    address: address.to_string(),
                    ip,
                });
            }
            Ok(_) => RejectReason::PublicAddress,
            Err(_) => RejectReason::InvalidAddress,
        };

        warn!("Rejected target '{}': {}", address, reason);
        note(
            self.sink.as_ref(),
            Severity::Error,
            SCOPE_CATEGORY,
            format!("Unauthorized target '{}' rejected: {}", address, reason),
        )
        .await;

        Authorization::Rejected {
            target: address.to_string(),
            reason,
        }
    }
}
