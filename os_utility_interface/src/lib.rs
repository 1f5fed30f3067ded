//! System-capability surface used by lifecycle tasks and reconcilers.
//!
//! Every capability is its own trait so tasks only depend on what they
//! touch; [`OsUtil`] bundles them behind one handle that is injected into
//! the engine.

use async_trait::async_trait;
use cluster_shared_types::{OrchestrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Combined stdout and stderr of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Remaining validity of the control-plane certificate set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertsExpiry {
    /// Smallest remaining validity, in days.
    pub min_days: i64,
    /// Remaining days per certificate name.
    pub certificates: HashMap<String, i64>,
}

/// Process execution.
#[async_trait]
pub trait Exec: Send + Sync {
    /// Run a command and capture its exit code and combined output.
    ///
    /// A non-zero exit code is not an error; only failing to spawn or
    /// wait on the process is.
    async fn command(&self, name: &str, env: &[(&str, &str)], args: &[&str]) -> Result<CommandOutput>;

    /// Same as [`Exec::command`] without logging the invocation.
    async fn command_with_no_logging(
        &self,
        name: &str,
        env: &[(&str, &str)],
        args: &[&str],
    ) -> Result<CommandOutput>;
}

/// Filesystem operations.
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    async fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn remove(&self, path: &Path) -> Result<()>;

    /// Remove a file or directory tree; a missing path is not an error.
    async fn remove_all(&self, path: &Path) -> Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy a file, returning the number of bytes copied.
    async fn copy(&self, from: &Path, to: &Path) -> Result<u64>;

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;

    /// Unpack a (possibly gzipped) tarball into `dst`.
    async fn extract_archive(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Download `url` into `path` and return the downloaded bytes.
    async fn download(&self, url: &str, path: &Path, mode: u32) -> Result<Vec<u8>>;
}

/// Distribution package manager.
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn check_installed(&self, package: &str) -> Result<bool>;

    async fn install(&self, packages: &[&str]) -> Result<()>;

    async fn update(&self) -> Result<()>;

    async fn add_repository_key(&self, url: &str, keyring: &Path) -> Result<()>;
}

/// Kernel parameters.
#[async_trait]
pub trait Sysctl: Send + Sync {
    /// Reload every sysctl configuration file.
    async fn reload(&self) -> Result<()>;
}

/// Init system control.
#[async_trait]
pub trait Systemd: Send + Sync {
    async fn is_running(&self, unit: &str) -> Result<bool>;

    async fn start(&self, unit: &str) -> Result<()>;

    async fn stop(&self, unit: &str) -> Result<()>;

    async fn restart(&self, unit: &str) -> Result<()>;

    async fn reload(&self, unit: &str) -> Result<()>;

    async fn daemon_reload(&self) -> Result<()>;
}

/// Cluster CLI wrapper.
#[async_trait]
pub trait Kubectl: Send + Sync {
    async fn run(&self, args: &[&str]) -> Result<()>;

    async fn run_with_response(&self, args: &[&str]) -> Result<String>;
}

/// Distribution tool wrapper (kubeadm).
#[async_trait]
pub trait Kubeadm: Send + Sync {
    async fn run(&self, args: &[&str]) -> Result<()>;

    async fn run_with_response(&self, args: &[&str]) -> Result<String>;

    /// `kubeadm init --config <file>`; returns the command output.
    async fn install(&self, config_file: &Path) -> Result<String>;

    /// `kubeadm upgrade apply <version> -y`.
    async fn upgrade(&self, version: &str, ignore_preflight: Option<&str>) -> Result<String>;

    async fn delete(&self) -> Result<String>;

    async fn version(&self) -> Result<String>;

    async fn certs_rotate_all(&self) -> Result<String>;

    async fn certs_expiry(&self) -> Result<CertsExpiry>;
}

/// Host identity.
#[async_trait]
pub trait Host: Send + Sync {
    /// Lowercase host name.
    async fn hostname(&self) -> Result<String>;
}

/// Every system capability behind a single injectable handle.
pub trait OsUtil: Send + Sync {
    fn exec(&self) -> &dyn Exec;
    fn filesystem(&self) -> &dyn Filesystem;
    fn package_manager(&self) -> &dyn PackageManager;
    fn sysctl(&self) -> &dyn Sysctl;
    fn systemd(&self) -> &dyn Systemd;
    fn kubectl(&self) -> &dyn Kubectl;
    fn kubeadm(&self) -> &dyn Kubeadm;
    fn host(&self) -> &dyn Host;
}

#[derive(Debug, thiserror::Error)]
pub enum OsUtilError {
    #[error("Command failed: {command} - {message}")]
    CommandFailed { command: String, message: String },

    #[error("Command {command} exited with code {code}: {output}")]
    NonZeroExit {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl OsUtilError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl From<OsUtilError> for OrchestrationError {
    fn from(err: OsUtilError) -> Self {
        OrchestrationError::SystemError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_maps_to_system_error() {
        let err: OrchestrationError = OsUtilError::NonZeroExit {
            command: "kubeadm reset -f".to_string(),
            code: 1,
            output: "boom".to_string(),
        }
        .into();
        match err {
            OrchestrationError::SystemError(msg) => assert!(msg.contains("kubeadm reset -f")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
