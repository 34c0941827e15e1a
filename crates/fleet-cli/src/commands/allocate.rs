// Dry-run identifier allocation

use anyhow::Result;
use clap::Args;
use std::collections::BTreeSet;
use std::path::PathBuf;

use fleet_control::{Deadline, IdentifierAllocator, PolicyRegistry};
use fleet_core::{
    AccountId, FleetConfig, FleetResult, Host, HostId, IdentifierBinding, IdentifierKind,
    Namespace, OsVersionId, ResourceDraft, ResourceKind, StoreTransaction, TransactionalStore,
};
use fleet_store::MemoryStore;

use crate::commands::common;

const SCRATCH_HOST: HostId = HostId::new(1);

#[derive(Args)]
pub struct AllocateArgs {
    /// Policy file; defaults to the configured `policy_file`
    pub file: Option<PathBuf>,

    /// OS version of the hypothetical host
    #[arg(long)]
    pub os: String,

    /// Identifier kind (uid, gid or port)
    #[arg(short, long)]
    pub kind: IdentifierKind,

    /// Name the identifier is for
    #[arg(short, long)]
    pub name: String,

    /// Explicit value to validate instead of allocating
    #[arg(long)]
    pub id: Option<u32>,

    /// Values already bound on the host
    #[arg(long, value_delimiter = ',')]
    pub used: Vec<u32>,
}

pub fn run(args: &AllocateArgs, config: &FleetConfig) -> Result<()> {
    let registry = common::load_policies(config, args.file.as_deref())?;
    let deadline = Deadline::after(config.transaction_timeout());
    let value = dry_run(&registry, args, &deadline)?;
    let verb = if args.id.is_some() { "accepted" } else { "allocated" };
    println!("{verb} {} {value} for '{}' on {}", args.kind, args.name, args.os);
    Ok(())
}

/// Allocate on a scratch store holding one host with `args.used` bound
fn dry_run(registry: &PolicyRegistry, args: &AllocateArgs, deadline: &Deadline) -> FleetResult<u32> {
    let host = Host::new(SCRATCH_HOST, OsVersionId::new(args.os.as_str()), "scratch");
    registry.get(&host.os_version)?;

    let store = MemoryStore::new();
    let mut txn = store.begin()?;
    txn.insert_host(host.clone())?;
    let namespace = Namespace::new(SCRATCH_HOST, args.kind);
    let used: BTreeSet<u32> = args.used.iter().copied().collect();
    for &value in &used {
        let resource = txn.insert(
            ResourceDraft::new(ResourceKind::new(format!("existing-{}", args.kind)), format!("#{value}"))
                .owned_by(AccountId::new("scratch"))
                .on_host(SCRATCH_HOST),
        )?;
        txn.bind(IdentifierBinding {
            namespace,
            value,
            resource,
        })?;
    }
    tracing::debug!(os = %host.os_version, %namespace, used = used.len(), "scratch host ready");

    let result = IdentifierAllocator::new(registry).allocate(
        &txn,
        &host,
        args.kind,
        args.id,
        &args.name,
        deadline,
    );
    txn.rollback();
    result
}
