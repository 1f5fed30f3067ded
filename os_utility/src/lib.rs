//! OS utility implementations for the cluster agent.
//!
//! - `LinuxOsUtil`: live host access through `tokio::process` and `tokio::fs`
//! - `DryRunOsUtil`: records and fakes every call (used with `--dry-run` and in tests)

pub mod dry_run;
pub mod linux;

pub use os_utility_interface::{
    CertsExpiry, CommandOutput, Exec, Filesystem, Host, Kubeadm, Kubectl, OsUtil, OsUtilError,
    PackageManager, Sysctl, Systemd,
};

pub use dry_run::DryRunOsUtil;
pub use linux::{parse_certs_expiry, LinuxOsUtil, LinuxOsUtilConfig};
