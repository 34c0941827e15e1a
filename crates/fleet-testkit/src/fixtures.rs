//! Shared fixtures: policy tables and a store with provisioned hosts

use fleet_core::{Host, HostId, StoreTransaction, TransactionalStore};
use fleet_store::MemoryStore;

/// Host running `rocky-9`
pub const ROCKY_HOST: HostId = HostId::new(1);

/// Host running `debian-12`
pub const DEBIAN_HOST: HostId = HostId::new(2);

/// Host running `tiny-os`, whose customer uid range is `[500, 600]`
pub const TINY_HOST: HostId = HostId::new(3);

/// Policy tables for every fixture OS version
pub const POLICY_TOML: &str = r#"
[[os]]
id = "rocky-9"
description = "Rocky Linux 9"

[os.uid]
system_low = 201
min = 1000
max = 60000
fixed = { root = 0, bin = 1, daemon = 2, nobody = 65534 }
dynamic_system = ["chrony", "sssd", "polkitd"]
regular_user = ["backup-agent", "deploy"]

[os.gid]
system_low = 201
min = 1000
max = 60000
fixed = { root = 0, wheel = 10, nobody = 65534 }
dynamic_system = ["chrony", "ssh_keys"]
regular_user = ["www-shared"]

[os.port]
system_low = 1
min = 1024
max = 65535
fixed = { ssh = 22, http = 80, https = 443 }
dynamic_system = ["rpcbind"]
regular_user = ["app-http", "app-metrics"]

[[os]]
id = "debian-12"
description = "Debian 12"

[os.uid]
system_low = 100
min = 1000
max = 59999
fixed = { root = 0, daemon = 1, nobody = 65534 }
dynamic_system = ["systemd-network", "messagebus"]
regular_user = ["backup-agent"]

[os.gid]
system_low = 100
min = 1000
max = 59999
fixed = { root = 0, sudo = 27, nogroup = 65534 }

[[os]]
id = "tiny-os"
description = "Deliberately small ranges"

[os.uid]
system_low = 100
min = 500
max = 600
fixed = { root = 0 }
dynamic_system = ["ntp"]
regular_user = ["backup"]

[os.gid]
system_low = 100
min = 500
max = 600
fixed = { root = 0 }
"#;

/// Every fixture host
pub fn hosts() -> Vec<Host> {
    vec![
        Host::new(ROCKY_HOST, "rocky-9", "www1.fleet.test"),
        Host::new(DEBIAN_HOST, "debian-12", "mail1.fleet.test"),
        Host::new(TINY_HOST, "tiny-os", "lab1.fleet.test"),
    ]
}

/// Store with every fixture host provisioned
pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    let mut txn = store.begin().expect("begin seed transaction");
    for host in hosts() {
        txn.insert_host(host).expect("provision fixture host");
    }
    txn.commit().expect("commit fixture hosts");
    store
}
