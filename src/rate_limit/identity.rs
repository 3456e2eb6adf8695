//! Rate-limit identity derivation
//!
//! Authenticated callers are keyed by user id. Anonymous callers are keyed by
//! a hash of their client address.
//!
//! The first `X-Forwarded-For` entry is trusted without checking that the
//! request came through a known proxy, so anonymous identities are spoofable
//! by any client that can set that header. Deployments that are not behind a
//! proxy they control should leave `forwarded_for` unset.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What the request layer knows about a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Authenticated user id, if any
    pub user_id: Option<String>,
    /// Raw `X-Forwarded-For` header value
    pub forwarded_for: Option<String>,
    /// Address of the direct peer
    pub peer_addr: Option<IpAddr>,
}

impl ClientInfo {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn anonymous(peer_addr: IpAddr) -> Self {
        Self {
            peer_addr: Some(peer_addr),
            ..Default::default()
        }
    }

    pub fn with_forwarded_for(mut self, header: impl Into<String>) -> Self {
        self.forwarded_for = Some(header.into());
        self
    }

    /// Best-effort client address: first forwarded-for entry, then the peer
    pub fn client_ip(&self) -> Option<IpAddr> {
        if let Some(forwarded_for) = &self.forwarded_for {
            // X-Forwarded-For can contain multiple IPs, take the first one
            if let Some(first_ip) = forwarded_for.split(',').next() {
                if let Ok(ip) = first_ip.trim().parse() {
                    return Some(ip);
                }
            }
        }
        self.peer_addr
    }
}

/// Key a rate limit is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    User(String),
    /// Hex digest of the client address
    Anonymous(String),
}

impl Identity {
    /// Derive the identity for a caller
    pub fn from_client(client: &ClientInfo) -> Self {
        match &client.user_id {
            Some(user_id) if !user_id.is_empty() => Identity::User(user_id.clone()),
            _ => {
                let address = client
                    .client_ip()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Identity::Anonymous(hash_address(&address))
            }
        }
    }

    /// Identity for an authenticated user
    pub fn user(user_id: impl Into<String>) -> Self {
        Identity::User(user_id.into())
    }

    /// Storage key form: `user_{id}` or `ip_{digest}`
    pub fn as_key(&self) -> String {
        match self {
            Identity::User(id) => format!("user_{}", id),
            Identity::Anonymous(digest) => format!("ip_{}", digest),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

fn hash_address(address: &str) -> String {
    let digest = Sha256::digest(address.as_bytes());
    hex::encode(&digest[..16])
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_user_key() {
        let identity = Identity::from_client(&ClientInfo::user("42"));
        assert_eq!(identity.as_key(), "user_42");
        assert!(!identity.is_anonymous());
    }

    #[test]
    fn test_anonymous_is_hashed() {
        let identity = Identity::from_client(&ClientInfo::anonymous("10.0.0.1".parse().unwrap()));
        let key = identity.as_key();
        assert!(key.starts_with("ip_"));
        assert!(!key.contains("10.0.0.1"));
        assert_eq!(key.len(), 3 + 32);
    }

    #[test]
    fn test_first_forwarded_entry_preferred() {
        let client = ClientInfo::anonymous("10.0.0.1".parse().unwrap())
            .with_forwarded_for("203.0.113.7, 10.0.0.2");
        assert_eq!(client.client_ip(), Some("203.0.113.7".parse().unwrap()));

        let direct = Identity::from_client(&ClientInfo::anonymous("203.0.113.7".parse().unwrap()));
        assert_eq!(Identity::from_client(&client), direct);
    }

    #[test]
    fn test_malformed_forwarded_for_falls_back_to_peer() {
        let client =
            ClientInfo::anonymous("10.0.0.1".parse().unwrap()).with_forwarded_for("garbage");
        assert_eq!(client.client_ip(), Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_empty_user_id_is_anonymous() {
        let client = ClientInfo {
            user_id: Some(String::new()),
            ..Default::default()
        };
        assert!(Identity::from_client(&client).is_anonymous());
    }
}
