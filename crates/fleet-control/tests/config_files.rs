//! The shipped example configuration loads and validates

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;

use fleet_control::PolicyRegistry;
use fleet_core::{FleetConfig, IdentifierKind, OsVersionId};

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

#[test]
fn example_configuration_points_at_loadable_policy_tables() {
    let config = FleetConfig::load_from_file(&config_dir().join("fleet.example.toml")).unwrap();
    config.validate().unwrap();
    assert_eq!(config.deletion.protected_accounts, vec!["root", "ops"]);

    let policy_file = config.policy_file.unwrap();
    let registry = PolicyRegistry::load_from_file(&policy_file).unwrap();
    let rocky = registry.get(&OsVersionId::new("rocky-9")).unwrap();
    assert!(rocky.kind(IdentifierKind::Port).unwrap().is_reserved("ssh"));
    assert_eq!(registry.len(), 2);
}
