//! kubectl and kubeadm wrappers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use cluster_shared_types::constants::{K3S_KUBECONFIG_PATH, KUBEADM_KUBECONFIG_PATH};
use cluster_shared_types::Result;
use os_utility_interface::{CertsExpiry, Exec, Kubeadm, Kubectl, OsUtilError};

use super::exec::LiveExec;

// ===== kubectl =====

/// `kubectl` against whichever distribution kubeconfig is present.
pub struct LiveKubectl {
    exec: Arc<LiveExec>,
    kubeconfigs: Vec<PathBuf>,
}

impl LiveKubectl {
    pub fn new(exec: Arc<LiveExec>) -> Self {
        Self {
            exec,
            kubeconfigs: vec![
                PathBuf::from(KUBEADM_KUBECONFIG_PATH),
                PathBuf::from(K3S_KUBECONFIG_PATH),
            ],
        }
    }

    async fn kubeconfig(&self) -> Option<&Path> {
        for path in &self.kubeconfigs {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Some(path.as_path());
            }
        }
        None
    }

    /// Output mentioning "error" counts as failure; a non-zero exit code alone
    /// does not, so callers can inspect connection-refused output.
    async fn invoke(&self, args: &[&str]) -> Result<String> {
        let kubeconfig = self.kubeconfig().await.map(|p| p.display().to_string());
        let mut full_args: Vec<&str> = args.to_vec();
        if let Some(path) = kubeconfig.as_deref() {
            full_args.extend_from_slice(&["--kubeconfig", path]);
        }

        let out = self.exec.command("kubectl", &[], &full_args).await?;
        if out.output.contains("error") {
            return Err(OsUtilError::CommandFailed {
                command: format!("kubectl {}", args.join(" ")),
                message: out.output,
            }
            .into());
        }
        Ok(out.output)
    }
}

#[async_trait]
impl Kubectl for LiveKubectl {
    async fn run(&self, args: &[&str]) -> Result<()> {
        let output = self.invoke(args).await?;
        info!(target: "kubectl", "{}", output.trim());
        Ok(())
    }

    async fn run_with_response(&self, args: &[&str]) -> Result<String> {
        self.invoke(args).await
    }
}

// ===== kubeadm =====

pub struct LiveKubeadm {
    exec: Arc<LiveExec>,
}

impl LiveKubeadm {
    pub fn new(exec: Arc<LiveExec>) -> Self {
        Self { exec }
    }

    async fn checked(&self, args: &[&str]) -> Result<String> {
        let out = self.exec.command("kubeadm", &[], args).await?;
        if !out.success() {
            return Err(OsUtilError::NonZeroExit {
                command: format!("kubeadm {}", args.join(" ")),
                code: out.exit_code,
                output: out.output,
            }
            .into());
        }
        Ok(out.output)
    }
}

#[async_trait]
impl Kubeadm for LiveKubeadm {
    async fn run(&self, args: &[&str]) -> Result<()> {
        self.exec.command("kubeadm", &[], args).await?;
        Ok(())
    }

    async fn run_with_response(&self, args: &[&str]) -> Result<String> {
        Ok(self.exec.command("kubeadm", &[], args).await?.output)
    }

    async fn install(&self, config_file: &Path) -> Result<String> {
        let config = config_file.display().to_string();
        let mut args = vec!["init", "--config", config.as_str()];

        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if cpus < 2 {
            args.push("--ignore-preflight-errors=NumCPU");
        }

        Ok(self.exec.command("kubeadm", &[], &args).await?.output)
    }

    async fn upgrade(&self, version: &str, ignore_preflight: Option<&str>) -> Result<String> {
        let ignore = ignore_preflight.map(|checks| format!("--ignore-preflight-errors={}", checks));
        let mut args = vec!["upgrade", "apply", version, "-y"];
        if let Some(flag) = ignore.as_deref() {
            args.push(flag);
        }
        self.checked(&args).await
    }

    async fn delete(&self) -> Result<String> {
        self.checked(&["reset", "-f"]).await
    }

    async fn version(&self) -> Result<String> {
        Ok(self
            .checked(&["version", "-o", "short"])
            .await?
            .trim()
            .to_string())
    }

    async fn certs_rotate_all(&self) -> Result<String> {
        Ok(self
            .exec
            .command("kubeadm", &[], &["certs", "renew", "all"])
            .await?
            .output)
    }

    async fn certs_expiry(&self) -> Result<CertsExpiry> {
        let out = self
            .exec
            .command("kubeadm", &[], &["certs", "check-expiration"])
            .await?;
        parse_certs_expiry(&out.output)
    }
}

/// Parse `kubeadm certs check-expiration` output.
///
/// Certificate rows have more than six columns with the residual time in the
/// seventh (for example `364d`). Header rows and the CA section's shorter
/// residual format (`9y`) are skipped. Rows whose residual cannot be parsed
/// are skipped too, and reported once every row has been read.
pub fn parse_certs_expiry(output: &str) -> Result<CertsExpiry> {
    let mut certificates = HashMap::new();
    let mut min_days = i64::MAX;
    let mut unparsable = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= 6
            || fields[0] == "CERTIFICATE"
            || fields[0] == "[check-expiration]"
            || !fields[6].ends_with('d')
        {
            continue;
        }

        let residual = fields[6].trim_end_matches('d');
        match residual.parse::<i64>() {
            Ok(days) => {
                min_days = min_days.min(days);
                certificates.insert(fields[0].to_string(), days);
            }
            Err(_) => {
                warn!(certificate = fields[0], residual, "Unable to evaluate certificate expiry");
                unparsable.push(format!("certs:{},expiry:{}", fields[0], residual));
            }
        }
    }

    if !unparsable.is_empty() {
        return Err(OsUtilError::Parse(format!(
            "not able to evaluate {}",
            unparsable.join(", ")
        ))
        .into());
    }

    Ok(CertsExpiry {
        min_days,
        certificates,
    })
}
