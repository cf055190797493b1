//! Service lifecycle: stop signals and service manager installation

use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "stagewatch";
pub const SERVICE_DESCRIPTION: &str =
    "Checks for batches in the exceptions queue and notifies support";

/// Wait for SIGINT or SIGTERM.
///
/// SIGTERM is what the service manager sends on `systemctl stop`.
pub async fn shutdown_signal() -> Result<(), ServiceError> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(ServiceError::Signal)?;

        tokio::select! {
            result = ctrl_c => {
                result.map_err(ServiceError::Signal)?;
                tracing::warn!("Received SIGINT, stopping service");
            }
            _ = terminate.recv() => {
                tracing::warn!("Received SIGTERM, stopping service");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.map_err(ServiceError::Signal)?;
        tracing::warn!("Received Ctrl-C, stopping service");
    }

    Ok(())
}

/// Options for rendering the systemd unit
#[derive(Debug, Clone)]
pub struct UnitOptions {
    pub executable: PathBuf,
    pub env_file: Option<PathBuf>,
}

impl UnitOptions {
    /// Unit for the currently running executable
    pub fn current_exe() -> Result<Self, ServiceError> {
        Ok(Self {
            executable: std::env::current_exe().map_err(ServiceError::Io)?,
            env_file: None,
        })
    }

    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }
}

/// Render a systemd unit that runs the daemon in the foreground
pub fn render_unit(options: &UnitOptions) -> String {
    let mut unit = format!(
        "[Unit]\n\
         Description={description}\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={exe} run\n\
         Restart=on-failure\n\
         RestartSec=5\n\
         KillSignal=SIGTERM\n\
         TimeoutStopSec=5\n",
        description = SERVICE_DESCRIPTION,
        exe = options.executable.display(),
    );

    if let Some(env_file) = &options.env_file {
        unit.push_str(&format!("EnvironmentFile={}\n", env_file.display()));
    }

    unit.push_str("\n[Install]\nWantedBy=multi-user.target\n");
    unit
}

/// Write the unit to `path`, refusing to overwrite an existing file
pub fn install_unit(options: &UnitOptions, path: &Path) -> Result<(), ServiceError> {
    if path.exists() {
        return Err(ServiceError::AlreadyInstalled(path.to_path_buf()));
    }
    std::fs::write(path, render_unit(options)).map_err(ServiceError::Io)?;
    tracing::info!(path = %path.display(), "Installed service unit");
    Ok(())
}

/// Service lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to listen for stop signal: {0}")]
    Signal(std::io::Error),

    #[error("Unit file already exists at {0}")]
    AlreadyInstalled(PathBuf),

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}
