//! Account and host scopes for invalidation records and session subscriptions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::identifiers::{AccountId, HostId, TableId};

/// Either every member of a domain or a finite set of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope<T: Ord> {
    /// Every member, including ones not yet known
    All,
    /// Exactly these members
    Set(BTreeSet<T>),
}

/// Scope over business accounts
pub type AccountScope = Scope<AccountId>;
/// Scope over managed hosts
pub type HostScope = Scope<HostId>;
/// Scope over tables
pub type TableScope = Scope<TableId>;

impl<T: Ord + Clone> Scope<T> {
    /// Empty finite scope
    pub fn none() -> Self {
        Self::Set(BTreeSet::new())
    }

    /// Scope holding a single member
    pub fn one(member: T) -> Self {
        Self::Set(BTreeSet::from([member]))
    }

    /// Whether this is the unbounded scope
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Whether the scope holds no member at all
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Set(set) if set.is_empty())
    }

    /// Whether `member` is covered
    pub fn contains(&self, member: &T) -> bool {
        match self {
            Self::All => true,
            Self::Set(set) => set.contains(member),
        }
    }

    /// Union with another scope; `All` absorbs any finite set
    pub fn merge(&mut self, other: &Scope<T>) {
        match other {
            Self::All => *self = Self::All,
            Self::Set(theirs) => {
                if let Self::Set(mine) = self {
                    mine.extend(theirs.iter().cloned());
                }
            }
        }
    }

    /// Whether the two scopes share at least one member
    pub fn intersects(&self, other: &Scope<T>) -> bool {
        match (self, other) {
            (Self::All, Self::All) => true,
            (Self::All, Self::Set(set)) | (Self::Set(set), Self::All) => !set.is_empty(),
            (Self::Set(a), Self::Set(b)) => a.iter().any(|member| b.contains(member)),
        }
    }
}

impl<T: Ord> FromIterator<T> for Scope<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::Set(iter.into_iter().collect())
    }
}

impl<T: Ord> Default for Scope<T> {
    fn default() -> Self {
        Self::All
    }
}
