use std::str::FromStr;

use crate::error::HostRefError;

/// How an administrative call names a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRef {
    /// `account@hostname`
    Named { account: String, name: String },
    /// A bare resource id.
    Id(String),
}

impl HostRef {
    pub fn parse(input: &str) -> Result<Self, HostRefError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.contains(',') {
            return Err(HostRefError::Malformed(input.to_string()));
        }

        let parts: Vec<&str> = trimmed.split('@').collect();
        match parts.as_slice() {
            [id] => Ok(HostRef::Id((*id).to_string())),
            [account, name] if !account.is_empty() && !name.is_empty() => Ok(HostRef::Named {
                account: (*account).to_string(),
                name: (*name).to_string(),
            }),
            _ => Err(HostRefError::Malformed(input.to_string())),
        }
    }
}

impl FromStr for HostRef {
    type Err = HostRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for HostRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostRef::Named { account, name } => write!(f, "{account}@{name}"),
            HostRef::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Structured form of a resource's `(ipv4,ssh_port,ipv6)` address column.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub ipv4: Option<String>,
    pub ssh_port: Option<String>,
    pub ipv6: Option<String>,
}

impl HostAddress {
    /// Parse the composite column. Anything not wrapped in parentheses yields
    /// `None`; absent or empty members become `None`.
    pub fn parse(composite: &str) -> Option<Self> {
        let inner = composite.strip_prefix('(')?.strip_suffix(')')?;
        let mut parts = inner.split(',').map(|p| {
            let p = p.trim();
            (!p.is_empty()).then(|| p.to_string())
        });
        Some(Self {
            ipv4: parts.next().flatten(),
            ssh_port: parts.next().flatten(),
            ipv6: parts.next().flatten(),
        })
    }

    pub fn to_composite(&self) -> String {
        format!(
            "({},{},{})",
            self.ipv4.as_deref().unwrap_or_default(),
            self.ssh_port.as_deref().unwrap_or_default(),
            self.ipv6.as_deref().unwrap_or_default()
        )
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_none() && self.ssh_port.is_none() && self.ipv6.is_none()
    }
}
