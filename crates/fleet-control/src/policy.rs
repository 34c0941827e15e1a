//! Allocation policy tables
//!
//! Each OS version ships its own idea of which uids, gids and ports belong to
//! the system and which are free for customers. Those tables are data: they
//! are loaded from TOML once at startup, validated, and looked up by the
//! host's OS version. Adding an OS version never touches allocator code.
//!
//! ```toml
//! [[os]]
//! id = "rocky-9"
//!
//! [os.uid]
//! system_low = 201
//! min = 1000
//! max = 60000
//! fixed = { root = 0, bin = 1 }
//! dynamic_system = ["chrony"]
//! regular_user = ["backup-agent"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use fleet_core::{FleetError, FleetResult, IdRange, IdentifierKind, OsVersionId};

/// How a policy table classifies a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Reserved name bound to exactly one value
    Fixed(u32),
    /// System account allocated dynamically below the customer range
    DynamicSystem(IdRange),
    /// Name allowed in the customer range
    RegularUser(IdRange),
    /// Name absent from the table; never allowed an explicit value
    Unknown,
}

impl Classification {
    /// Whether `value` satisfies this classification
    pub fn admits(&self, value: u32) -> bool {
        match self {
            Self::Fixed(id) => *id == value,
            Self::DynamicSystem(range) | Self::RegularUser(range) => range.contains(value),
            Self::Unknown => false,
        }
    }

    /// Short label for logs and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fixed(_) => "fixed",
            Self::DynamicSystem(_) => "dynamic-system",
            Self::RegularUser(_) => "regular-user",
            Self::Unknown => "unknown",
        }
    }
}

/// Policy for one identifier kind on one OS version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    /// Lowest dynamically allocated system value
    pub system_low: u32,
    /// First value of the customer range; end of the dynamic system range
    pub min: u32,
    /// Last value of the customer range
    pub max: u32,
    /// Reserved names and their exact values
    #[serde(default)]
    pub fixed: BTreeMap<String, u32>,
    /// Names allocated from `[system_low, min)`
    #[serde(default)]
    pub dynamic_system: BTreeSet<String>,
    /// Names allowed an explicit value in `[min, max]`
    #[serde(default)]
    pub regular_user: BTreeSet<String>,
}

impl KindPolicy {
    /// `[system_low, min)`
    pub fn dynamic_range(&self) -> IdRange {
        IdRange::half_open(self.system_low, self.min)
    }

    /// `[min, max]`
    pub fn regular_range(&self) -> IdRange {
        IdRange::new(self.min, self.max)
    }

    /// Classify a name
    pub fn classify(&self, name: &str) -> Classification {
        if let Some(id) = self.fixed.get(name) {
            Classification::Fixed(*id)
        } else if self.dynamic_system.contains(name) {
            Classification::DynamicSystem(self.dynamic_range())
        } else if self.regular_user.contains(name) {
            Classification::RegularUser(self.regular_range())
        } else {
            Classification::Unknown
        }
    }

    /// Whether the name is reserved for the operating system
    pub fn is_reserved(&self, name: &str) -> bool {
        matches!(
            self.classify(name),
            Classification::Fixed(_) | Classification::DynamicSystem(_)
        )
    }

    fn validate(&self, os: &OsVersionId, kind: IdentifierKind) -> FleetResult<()> {
        let at = |msg: String| FleetError::config(format!("{os}/{kind}: {msg}"));

        if self.system_low > self.min {
            return Err(at(format!(
                "system_low {} exceeds min {}",
                self.system_low, self.min
            )));
        }
        if self.min > self.max {
            return Err(at(format!("min {} exceeds max {}", self.min, self.max)));
        }

        let regular = self.regular_range();
        let mut seen_ids = BTreeMap::new();
        for (name, id) in &self.fixed {
            if regular.contains(*id) {
                return Err(at(format!(
                    "fixed '{name}' = {id} lies inside the regular range {regular}"
                )));
            }
            if let Some(other) = seen_ids.insert(*id, name) {
                return Err(at(format!("fixed '{name}' and '{other}' share value {id}")));
            }
        }

        let mut seen_names = BTreeSet::new();
        let names = self
            .fixed
            .keys()
            .chain(&self.dynamic_system)
            .chain(&self.regular_user);
        for name in names {
            if name.trim().is_empty() {
                return Err(at("empty name".to_string()));
            }
            if !seen_names.insert(name.as_str()) {
                return Err(at(format!("'{name}' appears in more than one class")));
            }
        }
        Ok(())
    }
}

/// Policy tables for one OS version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsPolicy {
    /// OS version these tables apply to
    pub id: OsVersionId,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Unix user ids
    #[serde(default)]
    pub uid: Option<KindPolicy>,
    /// Unix group ids
    #[serde(default)]
    pub gid: Option<KindPolicy>,
    /// Network ports
    #[serde(default)]
    pub port: Option<KindPolicy>,
}

impl OsPolicy {
    /// Table for one kind, if configured
    pub fn kind(&self, kind: IdentifierKind) -> Option<&KindPolicy> {
        match kind {
            IdentifierKind::Uid => self.uid.as_ref(),
            IdentifierKind::Gid => self.gid.as_ref(),
            IdentifierKind::Port => self.port.as_ref(),
        }
    }

    /// Validate every configured kind
    pub fn validate(&self) -> FleetResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(FleetError::config("OS policy with empty id"));
        }
        for kind in IdentifierKind::ALL {
            if let Some(policy) = self.kind(kind) {
                policy.validate(&self.id, kind)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    os: Vec<OsPolicy>,
}

/// Every loaded OS policy, keyed by OS version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRegistry {
    by_os: BTreeMap<OsVersionId, OsPolicy>,
}

impl PolicyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a policy document
    pub fn from_toml_str(content: &str) -> FleetResult<Self> {
        let file: PolicyFile = toml::from_str(content)?;
        let mut registry = Self::new();
        for policy in file.os {
            registry.insert(policy)?;
        }
        tracing::debug!(os_versions = registry.by_os.len(), "loaded allocation policies");
        Ok(registry)
    }

    /// Load and validate a policy file
    pub fn load_from_file(path: &Path) -> FleetResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FleetError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Add one validated OS policy; duplicate OS ids are rejected
    pub fn insert(&mut self, policy: OsPolicy) -> FleetResult<()> {
        policy.validate()?;
        if self.by_os.contains_key(&policy.id) {
            return Err(FleetError::config(format!(
                "duplicate policy for OS version {}",
                policy.id
            )));
        }
        self.by_os.insert(policy.id.clone(), policy);
        Ok(())
    }

    /// Policy for an OS version
    pub fn get(&self, os: &OsVersionId) -> FleetResult<&OsPolicy> {
        self.by_os
            .get(os)
            .ok_or_else(|| FleetError::config(format!("no allocation policy for OS version {os}")))
    }

    /// Every configured OS version
    pub fn os_versions(&self) -> impl Iterator<Item = &OsVersionId> {
        self.by_os.keys()
    }

    /// Number of configured OS versions
    pub fn len(&self) -> usize {
        self.by_os.len()
    }

    /// Whether no OS version is configured
    pub fn is_empty(&self) -> bool {
        self.by_os.is_empty()
    }
}
