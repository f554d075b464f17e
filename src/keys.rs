//! # Store Key Construction
//!
//! Every key the layer touches is built here so namespacing stays in one place.
//!
//! ```text
//! {domain}:{scope}              hash record      building:42
//! {domain}:{scope}:{name}       scalar / sub key mission:42:meta
//! {domain}:tasks:{scope}        sorted index     building:tasks:42
//! {domain}:tasks:{scope}:meta   task metadata    unit:tasks:42:meta
//! ```
//!
//! Domain tags never contain `:` and scope segments never contain `:` or
//! whitespace, so the first segment of any key identifies exactly one domain.
//! The scope `tasks` is reserved for task indices.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TASKS_SEGMENT: &str = "tasks";
const META_SEGMENT: &str = "meta";

/// Gameplay domains with a dedicated manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    Building,
    Unit,
    Research,
    Buff,
    Item,
    Mission,
    Resource,
}

impl DomainKind {
    pub const ALL: [DomainKind; 7] = [
        DomainKind::Building,
        DomainKind::Unit,
        DomainKind::Research,
        DomainKind::Buff,
        DomainKind::Item,
        DomainKind::Mission,
        DomainKind::Resource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainKind::Building => "building",
            DomainKind::Unit => "unit",
            DomainKind::Research => "research",
            DomainKind::Buff => "buff",
            DomainKind::Item => "item",
            DomainKind::Mission => "mission",
            DomainKind::Resource => "resource",
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace(self.as_str().to_string())
    }
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StoreError::UnknownDomain(s.to_string()))
    }
}

/// Validated domain tag that prefixes every key of one domain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Create a namespace for a domain not covered by [`DomainKind`]
    pub fn new(tag: impl Into<String>) -> StoreResult<Self> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(StoreError::invalid_key("domain tag must not be empty"));
        }
        if !tag
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(StoreError::invalid_key(format!(
                "domain tag '{tag}' must contain only [a-z0-9_]"
            )));
        }
        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully-qualified key in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey(String);

impl StoreKey {
    /// Hash record key: `{domain}:{scope}`
    pub fn record(namespace: &Namespace, scope: &str) -> StoreResult<Self> {
        validate_segment(scope)?;
        if scope == TASKS_SEGMENT {
            return Err(StoreError::invalid_key(
                "scope 'tasks' is reserved for task indices",
            ));
        }
        Ok(Self(format!("{namespace}:{scope}")))
    }

    /// Secondary key under a scope: `{domain}:{scope}:{name}`
    pub fn sub(namespace: &Namespace, scope: &str, name: &str) -> StoreResult<Self> {
        validate_segment(name)?;
        let record = Self::record(namespace, scope)?;
        Ok(Self(format!("{}:{name}", record.0)))
    }

    /// Sorted task index key: `{domain}:tasks:{scope}`
    pub fn task_index(namespace: &Namespace, scope: &str) -> StoreResult<Self> {
        validate_segment(scope)?;
        Ok(Self(format!("{namespace}:{TASKS_SEGMENT}:{scope}")))
    }

    /// Metadata hash that accompanies a task index
    pub fn task_metadata(index: &StoreKey) -> Self {
        Self(format!("{}:{META_SEGMENT}", index.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_segment(segment: &str) -> StoreResult<()> {
    if segment.is_empty() {
        return Err(StoreError::invalid_key("key segment must not be empty"));
    }
    if segment.contains(':') || segment.chars().any(char::is_whitespace) {
        return Err(StoreError::invalid_key(format!(
            "key segment '{segment}' must not contain ':' or whitespace"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let ns = DomainKind::Building.namespace();
        assert_eq!(StoreKey::record(&ns, "42").unwrap().as_str(), "building:42");
        assert_eq!(
            StoreKey::task_index(&ns, "42").unwrap().as_str(),
            "building:tasks:42"
        );
        let index = StoreKey::task_index(&ns, "42").unwrap();
        assert_eq!(
            StoreKey::task_metadata(&index).as_str(),
            "building:tasks:42:meta"
        );
        assert_eq!(
            StoreKey::sub(&DomainKind::Mission.namespace(), "42", "meta")
                .unwrap()
                .as_str(),
            "mission:42:meta"
        );
    }

    #[test]
    fn test_rejects_separator_in_scope() {
        let ns = DomainKind::Unit.namespace();
        assert!(matches!(
            StoreKey::record(&ns, "42:7"),
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(StoreKey::record(&ns, "").is_err());
        assert!(StoreKey::record(&ns, "a b").is_err());
        assert!(StoreKey::task_index(&ns, "x:y").is_err());
    }

    #[test]
    fn test_record_cannot_alias_task_index() {
        let ns = DomainKind::Item.namespace();
        assert!(StoreKey::record(&ns, "tasks").is_err());
    }

    #[test]
    fn test_domains_never_share_a_prefix() {
        let mut prefixes: Vec<String> = DomainKind::ALL
            .iter()
            .map(|k| format!("{}:", k.as_str()))
            .collect();
        prefixes.sort();
        prefixes.dedup();
        assert_eq!(prefixes.len(), DomainKind::ALL.len());
    }

    #[test]
    fn test_namespace_validation() {
        assert!(Namespace::new("guild").is_ok());
        assert!(Namespace::new("guild_war2").is_ok());
        assert!(Namespace::new("").is_err());
        assert!(Namespace::new("Guild").is_err());
        assert!(Namespace::new("guild:war").is_err());
    }

    #[test]
    fn test_domain_kind_round_trip_by_name() {
        for kind in DomainKind::ALL {
            assert_eq!(kind.as_str().parse::<DomainKind>().unwrap(), kind);
        }
        assert!(matches!(
            "alliance".parse::<DomainKind>(),
            Err(StoreError::UnknownDomain(_))
        ));
    }
}
