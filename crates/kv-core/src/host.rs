//! Seed / peer host addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A server address: `(name, port, optional-tls-name)`.
///
/// Equality and hashing are by `(name, port)` only — the TLS name is a
/// presentation detail for certificate verification, not identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub port: u16,
    pub tls_name: Option<String>,
}

impl Host {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self { name: name.into(), port, tls_name: None }
    }

    pub fn with_tls_name(mut self, tls_name: impl Into<String>) -> Self {
        self.tls_name = Some(tls_name.into());
        self
    }

    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.port == other.port
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_tls_name() {
        let a = Host::new("db1", 3000).with_tls_name("db1.internal");
        let b = Host::new("db1", 3000);
        assert_eq!(a, b);
    }

    #[test]
    fn equality_respects_port() {
        let a = Host::new("db1", 3000);
        let b = Host::new("db1", 3001);
        assert_ne!(a, b);
    }

    #[test]
    fn display_format() {
        assert_eq!(Host::new("db1", 3000).to_string(), "db1:3000");
    }
}
