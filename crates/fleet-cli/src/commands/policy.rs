// Policy table inspection

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use fleet_control::{Classification, PolicyRegistry};
use fleet_core::{FleetConfig, IdentifierKind, OsVersionId};

use crate::commands::common;

#[derive(Subcommand)]
pub enum PolicyCommand {
    /// Load and validate the tables, then summarize them
    Validate {
        /// Policy file; defaults to the configured `policy_file`
        file: Option<PathBuf>,
    },

    /// Show how a name is classified on an OS version
    Classify {
        /// Policy file; defaults to the configured `policy_file`
        file: Option<PathBuf>,

        /// OS version
        #[arg(long)]
        os: String,

        /// Identifier kind (uid, gid or port)
        #[arg(short, long)]
        kind: IdentifierKind,

        /// Name to classify
        #[arg(short, long)]
        name: String,

        /// Explicit value to check against the classification
        #[arg(long)]
        id: Option<u32>,
    },
}

pub fn handle_policy_command(command: PolicyCommand, config: &FleetConfig) -> Result<()> {
    match command {
        PolicyCommand::Validate { file } => {
            let registry = common::load_policies(config, file.as_deref())?;
            for line in summarize(&registry)? {
                println!("{line}");
            }
            Ok(())
        }
        PolicyCommand::Classify {
            file,
            os,
            kind,
            name,
            id,
        } => {
            let registry = common::load_policies(config, file.as_deref())?;
            println!(
                "{}",
                classify(&registry, &OsVersionId::new(os), kind, &name, id)?
            );
            Ok(())
        }
    }
}

fn summarize(registry: &PolicyRegistry) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for os in registry.os_versions() {
        let policy = registry.get(os)?;
        match &policy.description {
            Some(description) => lines.push(format!("{os}: {description}")),
            None => lines.push(os.to_string()),
        }
        for kind in IdentifierKind::ALL {
            let Some(table) = policy.kind(kind) else {
                continue;
            };
            lines.push(format!(
                "  {kind:<4} system {}  customer {}  fixed {}  dynamic {}  regular {}",
                table.dynamic_range(),
                table.regular_range(),
                table.fixed.len(),
                table.dynamic_system.len(),
                table.regular_user.len(),
            ));
        }
    }
    Ok(lines)
}

fn classify(
    registry: &PolicyRegistry,
    os: &OsVersionId,
    kind: IdentifierKind,
    name: &str,
    id: Option<u32>,
) -> Result<String> {
    let Some(table) = registry.get(os)?.kind(kind) else {
        return Ok(format!("{os} has no {kind} policy"));
    };
    let classification = table.classify(name);
    if let Some(id) = id {
        let verdict = if classification.admits(id) {
            "admitted"
        } else {
            "rejected"
        };
        return Ok(format!(
            "{name} = {id}: {verdict} ({})",
            classification.label()
        ));
    }
    Ok(match classification {
        Classification::Fixed(value) => format!("{name}: fixed {kind} {value}"),
        Classification::DynamicSystem(range) | Classification::RegularUser(range) => {
            format!("{name}: {} {kind} in {range}", classification.label())
        }
        Classification::Unknown => {
            format!("{name}: unknown; only automatic {kind} allocation is allowed")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
        [[os]]
        id = "tiny-os"
        description = "Small ranges"

        [os.uid]
        system_low = 100
        min = 500
        max = 600
        fixed = { root = 0 }
        dynamic_system = ["ntp"]
    "#;

    #[test]
    fn classification_is_reported_per_class() {
        let registry = PolicyRegistry::from_toml_str(POLICY).unwrap();
        let os = OsVersionId::new("tiny-os");

        assert_eq!(
            classify(&registry, &os, IdentifierKind::Uid, "root", None).unwrap(),
            "root: fixed uid 0"
        );
        assert!(classify(&registry, &os, IdentifierKind::Uid, "ntp", None)
            .unwrap()
            .starts_with("ntp: dynamic-system uid"));
        assert!(classify(&registry, &os, IdentifierKind::Uid, "svc1", None)
            .unwrap()
            .contains("unknown"));
        assert_eq!(
            classify(&registry, &os, IdentifierKind::Port, "ssh", None).unwrap(),
            "tiny-os has no port policy"
        );
    }

    #[test]
    fn explicit_values_get_a_verdict() {
        let registry = PolicyRegistry::from_toml_str(POLICY).unwrap();
        let os = OsVersionId::new("tiny-os");

        assert_eq!(
            classify(&registry, &os, IdentifierKind::Uid, "ntp", Some(150)).unwrap(),
            "ntp = 150: admitted (dynamic-system)"
        );
        assert_eq!(
            classify(&registry, &os, IdentifierKind::Uid, "root", Some(1)).unwrap(),
            "root = 1: rejected (fixed)"
        );
        assert_eq!(
            classify(&registry, &os, IdentifierKind::Uid, "svc1", Some(550)).unwrap(),
            "svc1 = 550: rejected (unknown)"
        );
    }

    #[test]
    fn summary_lists_each_configured_kind() {
        let registry = PolicyRegistry::from_toml_str(POLICY).unwrap();
        let lines = summarize(&registry).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "tiny-os: Small ranges");
        assert!(lines[1].contains("fixed 1  dynamic 1  regular 0"));
    }
}
