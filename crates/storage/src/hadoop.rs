//! HDFS storage through the `hadoop fs` command line
//!
//! Every operation spawns one `hadoop fs` subcommand. Paths handed to the
//! trait are relative to `model_path`.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::{Error, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::StorageBackend;

/// `hadoop fs` backed storage
#[derive(Debug, Clone)]
pub struct HadoopStorage {
    binary: String,
    model_path: String,
}

impl HadoopStorage {
    /// # Arguments
    /// * `binary` - hadoop executable, e.g. `"hadoop"` or an absolute path
    /// * `model_path` - HDFS directory holding snapshot files
    pub fn new(binary: impl Into<String>, model_path: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model_path: model_path.into(),
        }
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    fn remote_path(&self, path: &str) -> String {
        remote_path(&self.model_path, path)
    }

    /// Run `hadoop fs <args>` and return its output, failing on non-zero exit
    async fn fs(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(binary = %self.binary, ?args, "Running hadoop fs");
        let output = Command::new(&self.binary)
            .arg("fs")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::StorageUnavailable {
                backend: format!("{} ({})", self.binary, e),
            })?;
        Ok(output)
    }

    fn check(output: &std::process::Output, path: &str, op: &str) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such file or directory") {
            Err(Error::StoragePathNotFound {
                path: path.to_string(),
            })
        } else {
            Err(Error::Storage {
                message: format!("hadoop fs {} {} failed: {}", op, path, stderr.trim()),
            })
        }
    }
}

/// Join the HDFS model directory and a relative object path
fn remote_path(model_path: &str, path: &str) -> String {
    if model_path.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", model_path.trim_end_matches('/'), path)
    }
}

/// Object names from `hadoop fs -ls` output
///
/// Keeps the text after the last `/` of each listing line and drops the
/// `Found N items` header and blank lines.
fn parse_ls_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with("Found "))
        .filter_map(|line| line.rsplit_once('/').map(|(_, name)| name))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl StorageBackend for HadoopStorage {
    #[instrument(skip(self), fields(backend = "hadoop"))]
    async fn read(&self, path: &str) -> Result<Bytes> {
        let output = self.fs(&["-cat", &self.remote_path(path)]).await?;
        Self::check(&output, path, "-cat")?;
        Ok(Bytes::from(output.stdout))
    }

    #[instrument(skip(self, data), fields(backend = "hadoop", size = data.len()))]
    async fn write(&self, path: &str, data: Bytes) -> Result<u64> {
        let remote = self.remote_path(path);
        let mut child = Command::new(&self.binary)
            .args(["fs", "-put", "-f", "-", &remote])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::StorageUnavailable {
                backend: format!("{} ({})", self.binary, e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&data).await?;
            stdin.shutdown().await?;
        }
        let output = child.wait_with_output().await?;
        Self::check(&output, path, "-put")?;
        Ok(data.len() as u64)
    }

    #[instrument(skip(self), fields(backend = "hadoop"))]
    async fn delete(&self, path: &str) -> Result<()> {
        let output = self.fs(&["-rm", &self.remote_path(path)]).await?;
        Self::check(&output, path, "-rm")
    }

    #[instrument(skip(self), fields(backend = "hadoop"))]
    async fn exists(&self, path: &str) -> Result<bool> {
        let output = self.fs(&["-test", "-e", &self.remote_path(path)]).await?;
        Ok(output.status.success())
    }

    #[instrument(skip(self), fields(backend = "hadoop"))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", self.remote_path(prefix));
        let output = self.fs(&["-ls", &pattern]).await?;
        match Self::check(&output, prefix, "-ls") {
            Ok(()) => {}
            // An unmatched glob is an empty listing
            Err(Error::StoragePathNotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut names = parse_ls_output(&String::from_utf8_lossy(&output.stdout));
        names.sort();
        debug!(count = names.len(), "Listed objects");
        Ok(names)
    }

    #[instrument(skip(self), fields(backend = "hadoop"))]
    async fn get_file(&self, remote: &str, local: &Path) -> Result<u64> {
        let local_str = local.to_string_lossy();
        let output = self
            .fs(&["-get", "-f", &self.remote_path(remote), &local_str])
            .await?;
        Self::check(&output, remote, "-get")?;
        Ok(tokio::fs::metadata(local).await?.len())
    }

    #[instrument(skip(self), fields(backend = "hadoop"))]
    async fn put_file(&self, local: &Path, remote: &str) -> Result<u64> {
        let size = tokio::fs::metadata(local).await?.len();
        let local_str = local.to_string_lossy();
        let output = self
            .fs(&["-put", "-f", &local_str, &self.remote_path(remote)])
            .await?;
        Self::check(&output, remote, "-put")?;
        Ok(size)
    }
}
