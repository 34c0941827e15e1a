//! Core identifier types used across the fleet control plane
//!
//! Hosts, accounts and resources are referenced by these newtypes everywhere
//! so a `HostId` can never be passed where a `ResourceId` is expected.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::FleetError;

/// Managed host identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(pub u32);

impl HostId {
    /// Create a host id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

impl From<u32> for HostId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Operating system version identifier, selects an allocation policy table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OsVersionId(pub String);

impl OsVersionId {
    /// Create from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OsVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OsVersionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Business account name, the unit of account-scoped invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    /// Create from any string-like value
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Primary key of a managed resource row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Create a resource id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource-{}", self.0)
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Kind of managed resource (account, Unix user, site, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKind(Cow<'static, str>);

impl ResourceKind {
    /// Business account
    pub const ACCOUNT: Self = Self::from_static("account");
    /// Unix user account on a host
    pub const UNIX_USER: Self = Self::from_static("unix-user");
    /// Unix group on a host
    pub const UNIX_GROUP: Self = Self::from_static("unix-group");
    /// Network port bind on a host
    pub const NET_BIND: Self = Self::from_static("net-bind");
    /// Web or application site
    pub const SITE: Self = Self::from_static("site");
    /// Mail domain
    pub const MAIL_DOMAIN: Self = Self::from_static("mail-domain");

    /// Create from a static name
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create from an owned name
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a persisted table; caches and client sessions key invalidation on it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(Cow<'static, str>);

impl TableId {
    /// Business accounts
    pub const ACCOUNTS: Self = Self::from_static("accounts");
    /// Unix users
    pub const UNIX_USERS: Self = Self::from_static("unix_users");
    /// Unix groups
    pub const UNIX_GROUPS: Self = Self::from_static("unix_groups");
    /// Unix group membership join rows
    pub const UNIX_GROUP_MEMBERS: Self = Self::from_static("unix_group_members");
    /// Network binds
    pub const NET_BINDS: Self = Self::from_static("net_binds");
    /// Sites
    pub const SITES: Self = Self::from_static("sites");
    /// Mail domains
    pub const MAIL_DOMAINS: Self = Self::from_static("mail_domains");
    /// Host-scoped identifier bindings (uid, gid, port)
    pub const IDENTIFIER_BINDINGS: Self = Self::from_static("identifier_bindings");
    /// Join rows between resources not guarded by their own rules
    pub const RESOURCE_LINKS: Self = Self::from_static("resource_links");

    /// Create from a static name
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create from an owned name
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated operator or customer issuing an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Principal(pub String);

impl Principal {
    /// Create from any string-like value
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connected client session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Class of host-scoped identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Unix user id
    Uid,
    /// Unix group id
    Gid,
    /// Network port
    Port,
}

impl IdentifierKind {
    /// All kinds, in policy-table order
    pub const ALL: [IdentifierKind; 3] = [Self::Uid, Self::Gid, Self::Port];

    /// Lowercase name used in config files and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uid => "uid",
            Self::Gid => "gid",
            Self::Port => "port",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierKind {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uid" => Ok(Self::Uid),
            "gid" => Ok(Self::Gid),
            "port" => Ok(Self::Port),
            other => Err(FleetError::invalid(format!(
                "unknown identifier kind '{other}'"
            ))),
        }
    }
}

/// The space within which identifier values must be unique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    /// Host owning the namespace
    pub host: HostId,
    /// Identifier class
    pub kind: IdentifierKind,
}

impl Namespace {
    /// Create a namespace
    pub fn new(host: HostId, kind: IdentifierKind) -> Self {
        Self { host, kind }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.kind)
    }
}
