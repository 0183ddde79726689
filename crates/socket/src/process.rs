//! Lifecycle of the Node sidecar process that owns the protocol session.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

use crate::error::{Error, Result};

/// Handle to a running sidecar process.
#[derive(Debug)]
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    /// Port the sidecar WebSocket server listens on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the sidecar, SIGTERM first, kill after a grace period.
    pub async fn stop(&mut self) {
        info!("stopping sidecar process");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };
            if let Some(pid) = self.child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "sidecar process exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
            Err(_) => {
                warn!("sidecar did not exit in time, killing");
                let _ = self.child.kill().await;
            },
        }
    }
}

/// Locate the sidecar directory.
///
/// Checked in order: an explicit path, `NOVABOT_SIDECAR_DIR`, then
/// `sidecar/baileys` relative to the working directory and its parents.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.join("package.json").exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::sidecar(format!(
            "sidecar dir missing package.json: {}",
            path.display()
        )));
    }

    if let Ok(dir) = std::env::var("NOVABOT_SIDECAR_DIR") {
        let path = PathBuf::from(&dir);
        if path.join("package.json").exists() {
            return Ok(path);
        }
        warn!(path = %dir, "NOVABOT_SIDECAR_DIR set but package.json not found");
    }

    for rel in ["sidecar/baileys", "../sidecar/baileys", "../../sidecar/baileys"] {
        let path = PathBuf::from(rel);
        if path.join("package.json").exists() {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    Err(Error::sidecar(
        "sidecar not found; set NOVABOT_SIDECAR_DIR or create sidecar/baileys",
    ))
}

/// Spawn the sidecar process and forward its logs into tracing.
pub async fn start_sidecar(dir: &Path, port: u16, auth_dir: &Path) -> Result<SidecarProcess> {
    if !dir.join("dist/index.js").exists() {
        return Err(Error::sidecar(format!(
            "sidecar not built at {}; run `npm install && npm run build` there first",
            dir.display()
        )));
    }

    info!(path = %dir.display(), port, "starting sidecar process");

    let mut child = Command::new("node")
        .arg("dist/index.js")
        .current_dir(dir)
        .env("NOVABOT_SIDECAR_PORT", port.to_string())
        .env("NOVABOT_AUTH_DIR", auth_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                forward_log_line(&line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "sidecar", "{line}");
            }
        });
    }

    // Give the process a moment to fail fast on startup errors.
    tokio::time::sleep(Duration::from_millis(500)).await;
    match child.try_wait() {
        Ok(Some(status)) => {
            return Err(Error::sidecar(format!(
                "sidecar exited immediately with {status}"
            )));
        },
        Ok(None) => {},
        Err(e) => return Err(e.into()),
    }

    info!(port, "sidecar process started");
    Ok(SidecarProcess { child, port })
}

/// The sidecar logs pino JSON lines; map their levels onto tracing.
fn forward_log_line(line: &str) {
    if line.starts_with('{')
        && let Ok(log) = serde_json::from_str::<serde_json::Value>(line)
    {
        let level = log.get("level").and_then(|v| v.as_u64()).unwrap_or(30);
        let msg = log.get("msg").and_then(|v| v.as_str()).unwrap_or(line);
        match level {
            0..=20 => debug!(target: "sidecar", "{msg}"),
            21..=30 => info!(target: "sidecar", "{msg}"),
            31..=40 => warn!(target: "sidecar", "{msg}"),
            _ => error!(target: "sidecar", "{msg}"),
        }
        return;
    }
    info!(target: "sidecar", "{line}");
}
