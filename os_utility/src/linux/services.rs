//! Package manager, sysctl and systemd on top of [`LiveExec`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use cluster_shared_types::Result;
use os_utility_interface::{CommandOutput, Exec, OsUtilError, PackageManager, Sysctl, Systemd};

use super::exec::LiveExec;

fn check(command: &str, output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        Ok(output)
    } else {
        Err(OsUtilError::NonZeroExit {
            command: command.to_string(),
            code: output.exit_code,
            output: output.output,
        }
        .into())
    }
}

// ===== Package manager =====

/// apt/dpkg based package manager.
pub struct LivePackageManager {
    exec: Arc<LiveExec>,
}

impl LivePackageManager {
    pub fn new(exec: Arc<LiveExec>) -> Self {
        Self { exec }
    }
}

#[async_trait]
impl PackageManager for LivePackageManager {
    async fn check_installed(&self, package: &str) -> Result<bool> {
        let out = self.exec.command("dpkg", &[], &["-l", package]).await?;
        Ok(out.success())
    }

    async fn install(&self, packages: &[&str]) -> Result<()> {
        info!(packages = ?packages, "Installing packages");

        let mut unhold = vec!["unhold"];
        unhold.extend_from_slice(packages);
        self.exec.command("apt-mark", &[], &unhold).await?;

        let mut install = vec!["install", "-y"];
        install.extend_from_slice(packages);
        let out = self
            .exec
            .command("apt-get", &[("DEBIAN_FRONTEND", "noninteractive")], &install)
            .await?;
        check("apt-get install", out)?;

        let mut hold = vec!["hold"];
        hold.extend_from_slice(packages);
        self.exec.command("apt-mark", &[], &hold).await?;
        Ok(())
    }

    async fn update(&self) -> Result<()> {
        let out = self.exec.command("apt-get", &[], &["update"]).await?;
        check("apt-get update", out).map(|_| ())
    }

    async fn add_repository_key(&self, url: &str, keyring: &Path) -> Result<()> {
        if url.is_empty() {
            return Err(OsUtilError::Download("no key url".to_string()).into());
        }
        info!(url, "Adding signing key");
        let script = format!(
            "curl -fsSL {} | gpg --dearmor --yes -o {}",
            url,
            keyring.display()
        );
        let out = self.exec.command("bash", &[], &["-c", &script]).await?;
        check("add repository key", out).map(|_| ())
    }
}

// ===== Sysctl =====

pub struct LiveSysctl {
    exec: Arc<LiveExec>,
}

impl LiveSysctl {
    pub fn new(exec: Arc<LiveExec>) -> Self {
        Self { exec }
    }
}

#[async_trait]
impl Sysctl for LiveSysctl {
    async fn reload(&self) -> Result<()> {
        let out = self.exec.command("sysctl", &[], &["--system"]).await?;
        check("sysctl --system", out).map(|_| ())
    }
}

// ===== Systemd =====

pub struct LiveSystemd {
    exec: Arc<LiveExec>,
}

impl LiveSystemd {
    pub fn new(exec: Arc<LiveExec>) -> Self {
        Self { exec }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<()> {
        let out = self.exec.command("systemctl", &[], args).await?;
        check(&format!("systemctl {}", args.join(" ")), out).map(|_| ())
    }
}

#[async_trait]
impl Systemd for LiveSystemd {
    async fn is_running(&self, unit: &str) -> Result<bool> {
        let out = self
            .exec
            .command_with_no_logging("systemctl", &[], &["show", "-p", "ActiveState", "--value", unit])
            .await?;
        let out = check("systemctl show", out)?;
        Ok(out.output.trim() == "active")
    }

    async fn start(&self, unit: &str) -> Result<()> {
        info!(unit, "Starting service");
        self.systemctl(&["start", unit]).await
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        info!(unit, "Stopping service");
        self.systemctl(&["stop", unit]).await
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        info!(unit, "Restarting service");
        self.systemctl(&["restart", unit]).await
    }

    async fn reload(&self, unit: &str) -> Result<()> {
        self.systemctl(&["reload", unit]).await
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"]).await
    }
}
