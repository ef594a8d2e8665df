//! Script execution: credential profile setup and the provisioning command.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use devops_pack_core::config::{Config, RunnerConfig};
use devops_pack_core::error::{DevopsPackError, Result};
use devops_pack_core::protocol::EventFrame;
use devops_pack_core::types::ScriptRequest;

/// Sends `output` events to a single connection.
#[derive(Clone)]
pub struct OutputSink {
    conn_id: String,
    event_tx: mpsc::UnboundedSender<String>,
}

impl OutputSink {
    pub fn new(conn_id: impl Into<String>, event_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            event_tx,
        }
    }

    /// Emit one line as an `output` event. Lines for a closed connection are dropped.
    pub fn emit(&self, line: impl Into<String>) {
        self.send_frame(&EventFrame::output(line));
    }

    pub fn send_frame(&self, frame: &EventFrame) {
        match frame.to_text() {
            Ok(text) => {
                if self.event_tx.send(text).is_err() {
                    debug!(conn_id = %self.conn_id, "Connection gone, dropping frame");
                }
            }
            Err(e) => warn!(conn_id = %self.conn_id, %e, "Failed to serialize frame"),
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }
}

/// Executes a validated `run_script` request, reporting progress through the sink.
///
/// The request arrives with defaults applied and credentials present.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, request: &ScriptRequest, sink: &OutputSink) -> Result<()>;
}

/// Writes the `[default]` AWS profile and runs the configured shell command.
pub struct ProvisionRunner {
    config: RunnerConfig,
    credentials_dir: PathBuf,
}

impl ProvisionRunner {
    pub fn new(config: RunnerConfig, credentials_dir: PathBuf) -> Self {
        Self {
            config,
            credentials_dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.runner(), config.credentials_dir())
    }

    pub fn aws_config_file(&self) -> PathBuf {
        self.credentials_dir.join("config")
    }

    pub fn aws_credentials_file(&self) -> PathBuf {
        self.credentials_dir.join("credentials")
    }

    async fn run_command(&self, command: &str, request: &ScriptRequest, sink: &OutputSink) -> Result<()> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.timeout_ms);

        info!(conn_id = %sink.conn_id(), project = %request.project, "Starting run command");

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("AWS_ACCESS_KEY_ID", &request.params.aws_access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &request.params.aws_secret_access_key)
            .env("AWS_DEFAULT_REGION", &request.params.region)
            .env("AWS_CONFIG_FILE", self.aws_config_file())
            .env("AWS_SHARED_CREDENTIALS_FILE", self.aws_credentials_file())
            .env("DOTP_PROJECT", &request.project)
            .env("DOTP_MULTIPLE_VMS", request.multiple_vm.to_string())
            .env("DOTP_INSTANCE_TYPE", &request.instance_type)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DevopsPackError::Runner("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DevopsPackError::Runner("stderr not captured".into()))?;

        let mut out = BufReader::new(stdout);
        let mut err = BufReader::new(stderr);
        let (mut out_buf, mut err_buf) = (Vec::new(), Vec::new());

        // read_until keeps partial bytes in the buffer across select polls.
        let streamed = tokio::time::timeout(timeout, async {
            let (mut out_done, mut err_done) = (false, false);
            while !(out_done && err_done) {
                tokio::select! {
                    read = out.read_until(b'\n', &mut out_buf), if !out_done => {
                        out_done = forward_line(read, &mut out_buf, sink, "stdout");
                    }
                    read = err.read_until(b'\n', &mut err_buf), if !err_done => {
                        err_done = forward_line(read, &mut err_buf, sink, "stderr");
                    }
                }
            }
            child.wait().await
        })
        .await;

        match streamed {
            Ok(Ok(status)) if status.success() => {
                let secs = started.elapsed().as_secs_f64();
                info!(conn_id = %sink.conn_id(), secs, "Run command finished");
                sink.emit(format!("Run finished in {secs:.2} seconds"));
                Ok(())
            }
            Ok(Ok(status)) => {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".into());
                warn!(conn_id = %sink.conn_id(), %code, "Run command failed");
                sink.emit(format!("[error] Script exited with status {code}"));
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(conn_id = %sink.conn_id(), %e, "Failed to kill timed out command");
                }
                let secs = timeout.as_secs_f64();
                warn!(conn_id = %sink.conn_id(), secs, "Run command timed out");
                sink.emit(format!("[error] Script timed out after {secs:.2} seconds"));
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ScriptRunner for ProvisionRunner {
    async fn run(&self, request: &ScriptRequest, sink: &OutputSink) -> Result<()> {
        if let Err(e) = write_profile(&self.credentials_dir, request).await {
            warn!(conn_id = %sink.conn_id(), %e, "Login failed");
            sink.emit("Something went wrong with login. Please check credentials!");
            return Err(e);
        }
        sink.emit("Login success!");

        match self.config.command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => self.run_command(command, request, sink).await,
            _ => {
                sink.emit("No run command configured; nothing to provision.");
                Ok(())
            }
        }
    }
}

/// Emit the line accumulated in `buf` after a `read_until`. Returns true once
/// the stream is finished.
fn forward_line(
    read: std::io::Result<usize>,
    buf: &mut Vec<u8>,
    sink: &OutputSink,
    stream: &str,
) -> bool {
    match read {
        Ok(0) => true,
        Ok(_) => {
            let line = String::from_utf8_lossy(buf);
            sink.emit(line.trim_end_matches(['\n', '\r']));
            buf.clear();
            false
        }
        Err(e) => {
            warn!(conn_id = %sink.conn_id(), stream, %e, "Failed to read command output");
            true
        }
    }
}

/// Write the `[default]` profile into `dir/config` and `dir/credentials`.
pub async fn write_profile(dir: &Path, request: &ScriptRequest) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let config = format!(
        "[default]\nregion = {}\noutput = json\n",
        request.params.region
    );
    tokio::fs::write(dir.join("config"), config).await?;

    let credentials = format!(
        "[default]\naws_access_key_id = {}\naws_secret_access_key = {}\n",
        request.params.aws_access_key_id, request.params.aws_secret_access_key
    );
    let credentials_path = dir.join("credentials");
    tokio::fs::write(&credentials_path, credentials).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&credentials_path, std::fs::Permissions::from_mode(0o600))
            .await?;
    }

    debug!(dir = %dir.display(), "Wrote AWS profile");
    Ok(())
}
