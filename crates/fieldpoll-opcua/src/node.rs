// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC-UA node addresses.
//!
//! Supported formats:
//! - `ns=2;i=1001` (numeric)
//! - `ns=2;s=Channel1.Temperature` (string)
//! - `i=2258` / `s=Name` (namespace 0)

use std::fmt;
use std::str::FromStr;

use opcua::types::NodeId;
use thiserror::Error;

/// Why a node address was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeAddressError {
    /// The namespace index is not a `u16`.
    #[error("invalid namespace index in '{0}'")]
    InvalidNamespace(String),
    /// The identifier part is missing or of an unsupported kind.
    #[error("expected 'i=<number>' or 's=<string>' in '{0}'")]
    InvalidIdentifier(String),
}

/// Node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
}

/// A parsed node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    /// Namespace index.
    pub namespace: u16,
    /// Identifier within the namespace.
    pub identifier: NodeIdentifier,
}

impl NodeAddress {
    /// Parses `ns=<n>;i=<num>` or `ns=<n>;s=<text>`.
    pub fn parse(s: &str) -> Result<Self, NodeAddressError> {
        let text = s.trim();
        let (namespace, identifier) = match text.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| NodeAddressError::InvalidIdentifier(s.to_string()))?;
                let ns: u16 = ns
                    .trim()
                    .parse()
                    .map_err(|_| NodeAddressError::InvalidNamespace(s.to_string()))?;
                (ns, id.trim())
            }
            None => (0, text),
        };

        let identifier = if let Some(num) = identifier.strip_prefix("i=") {
            NodeIdentifier::Numeric(
                num.parse()
                    .map_err(|_| NodeAddressError::InvalidIdentifier(s.to_string()))?,
            )
        } else if let Some(name) = identifier.strip_prefix("s=") {
            if name.is_empty() {
                return Err(NodeAddressError::InvalidIdentifier(s.to_string()));
            }
            NodeIdentifier::String(name.to_string())
        } else {
            return Err(NodeAddressError::InvalidIdentifier(s.to_string()));
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }

    /// Converts to the client's node id.
    pub fn to_node_id(&self) -> NodeId {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => NodeId::new(self.namespace, *v),
            NodeIdentifier::String(v) => NodeId::new(self.namespace, v.clone()),
        }
    }
}

impl FromStr for NodeAddress {
    type Err = NodeAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => write!(f, "ns={};i={}", self.namespace, v),
            NodeIdentifier::String(v) => write!(f, "ns={};s={}", self.namespace, v),
        }
    }
}
