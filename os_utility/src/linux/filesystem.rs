use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::Client;
use tar::Archive;
use tracing::{debug, info, warn};

use cluster_shared_types::Result;
use os_utility_interface::{Filesystem, OsUtilError};

/// Host filesystem backed by `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct LiveFilesystem {
    client: Client,
}

impl LiveFilesystem {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_gzipped(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".gz") || name.ends_with(".tgz")
}

/// Unpack every entry, skipping absolute or parent-relative paths.
fn unpack<R: io::Read>(archive: &mut Archive<R>, dst: &Path) -> io::Result<()> {
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        let path_str = path.to_string_lossy();

        if path_str.starts_with('/') || path_str.contains("..") {
            warn!("Skipping potentially unsafe path: {}", path_str);
            continue;
        }

        entry.unpack_in(dst)?;
    }
    Ok(())
}

#[async_trait]
impl Filesystem for LiveFilesystem {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        debug!("Reading file {}", path.display());
        Ok(tokio::fs::read(path)
            .await
            .map_err(|e| OsUtilError::io(path, e))?)
    }

    async fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        info!("Writing file {}", path.display());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| OsUtilError::io(parent, e))?;
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| OsUtilError::io(path, e))?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| OsUtilError::io(path, e))?;
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| OsUtilError::io(path, e))?)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path)
            .await
            .map_err(|e| OsUtilError::io(path, e))?)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        info!("Removing file {}", path.display());
        Ok(tokio::fs::remove_file(path)
            .await
            .map_err(|e| OsUtilError::io(path, e))?)
    }

    async fn remove_all(&self, path: &Path) -> Result<()> {
        info!("Removing {}", path.display());
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(OsUtilError::io(path, e).into()),
        };

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        Ok(result.map_err(|e| OsUtilError::io(path, e))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        info!("Moving {} to {}", from.display(), to.display());
        Ok(tokio::fs::rename(from, to)
            .await
            .map_err(|e| OsUtilError::io(from, e))?)
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| OsUtilError::io(parent, e))?;
        }
        Ok(tokio::fs::copy(from, to)
            .await
            .map_err(|e| OsUtilError::io(from, e))?)
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        Ok(std::os::unix::fs::chown(path, Some(uid), Some(gid))
            .map_err(|e| OsUtilError::io(path, e))?)
    }

    async fn extract_archive(&self, src: &Path, dst: &Path) -> Result<()> {
        info!("Extracting {} into {}", src.display(), dst.display());
        let src: PathBuf = src.to_path_buf();
        let dst: PathBuf = dst.to_path_buf();

        let result = tokio::task::spawn_blocking(move || -> io::Result<()> {
            std::fs::create_dir_all(&dst)?;
            let file = std::fs::File::open(&src)?;
            if is_gzipped(&src) {
                unpack(&mut Archive::new(GzDecoder::new(file)), &dst)
            } else {
                unpack(&mut Archive::new(file), &dst)
            }
        })
        .await
        .map_err(|e| OsUtilError::CommandFailed {
            command: "extract".to_string(),
            message: e.to_string(),
        })?;

        Ok(result.map_err(|e| OsUtilError::Parse(format!("extract archive: {}", e)))?)
    }

    async fn download(&self, url: &str, path: &Path, mode: u32) -> Result<Vec<u8>> {
        info!("Downloading {} to {}", url, path.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| OsUtilError::Download(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(OsUtilError::Download(format!(
                "{} returned status {}",
                url,
                response.status()
            ))
            .into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| OsUtilError::Download(format!("{}: {}", url, e)))?
            .to_vec();

        self.write_file(path, &bytes, mode).await?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_and_remove_all() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LiveFilesystem::new();
        let file = dir.path().join("nested").join("config.yaml");

        fs.write_file(&file, b"kind: Config", 0o600).await.unwrap();
        assert!(fs.exists(&file).await.unwrap());
        assert_eq!(fs.read_file(&file).await.unwrap(), b"kind: Config");

        let mode = std::fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        fs.remove_all(&dir.path().join("nested")).await.unwrap();
        assert!(!fs.exists(&file).await.unwrap());

        // Missing paths are fine.
        fs.remove_all(&dir.path().join("nested")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_directory() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LiveFilesystem::new();
        let manifests = dir.path().join("manifests");
        let backup = dir.path().join("manifests-bkp");

        fs.write_file(&manifests.join("etcd.yaml"), b"etcd", 0o644)
            .await
            .unwrap();
        fs.rename(&manifests, &backup).await.unwrap();

        assert!(!fs.exists(&manifests).await.unwrap());
        assert!(fs.exists(&backup.join("etcd.yaml")).await.unwrap());
    }

    #[tokio::test]
    async fn test_extract_gzipped_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("bin.tar.gz");

        {
            let file = std::fs::File::create(&archive_path).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"#!/bin/sh\necho containerd\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, "bin/containerd", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let fs = LiveFilesystem::new();
        let dst = dir.path().join("out");
        fs.extract_archive(&archive_path, &dst).await.unwrap();

        let extracted = std::fs::read(dst.join("bin/containerd")).unwrap();
        assert!(extracted.starts_with(b"#!/bin/sh"));
    }
}
