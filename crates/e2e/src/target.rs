//! Application under test - optional spawning and reachability probing

use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::error::{E2eError, E2eResult};

/// Time the process group gets to exit after SIGTERM
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Handle to the application under test. Owns the process when this runner
/// started it. The start command runs in its own process group, and stopping
/// signals the whole group, so dev servers forked by the shell go too.
pub struct TargetHandle {
    child: Option<Child>,
    base_url: String,
}

impl TargetHandle {
    /// Start the application if a start command is configured, then wait for
    /// the base URL to answer.
    pub async fn ensure(config: &TargetConfig) -> E2eResult<Self> {
        let mut handle = TargetHandle {
            child: None,
            base_url: config.base_url.clone(),
        };

        if let Some(command) = &config.start_command {
            info!("Starting application: {}", command);

            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(command)
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            if let Some(dir) = &config.working_dir {
                cmd.current_dir(dir);
            }
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                cmd.process_group(0);
            }

            let child = cmd.spawn().map_err(|e| {
                E2eError::TargetStartup(format!("Failed to spawn '{}': {}", command, e))
            })?;
            handle.child = Some(child);
        }

        if config.probe {
            handle.wait_until_reachable(config.startup_timeout()).await?;
            info!("Application is reachable at {}", handle.base_url);
        }

        Ok(handle)
    }

    /// Any answer below 500 counts; the app is free to redirect or 404 on `/`.
    async fn wait_until_reachable(&mut self, timeout_duration: Duration) -> E2eResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(E2eError::TargetStartup(format!(
                        "Application exited early with {}",
                        status
                    )));
                }
            }

            match client.get(&self.base_url).send().await {
                Ok(resp) if !resp.status().is_server_error() => {
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Probe returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for {} ...", self.base_url);
                    }
                    // Connection refused is expected while the app is starting
                    if !e.is_connect() {
                        warn!("Probe error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(E2eError::TargetUnreachable {
            url: self.base_url.clone(),
            attempts,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether this runner started the application
    pub fn is_managed(&self) -> bool {
        self.child.is_some()
    }

    /// Stop the application if this runner started it
    pub fn stop(&mut self) -> E2eResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        info!("Stopping application (pid: {})", child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let group = Pid::from_raw(child.id() as i32);
            if killpg(group, Signal::SIGTERM).is_ok() {
                let deadline = std::time::Instant::now() + STOP_GRACE;
                while std::time::Instant::now() < deadline {
                    if matches!(child.try_wait(), Ok(Some(_))) {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
            // whatever ignored SIGTERM or outlived the shell
            if let Err(e) = killpg(group, Signal::SIGKILL) {
                debug!("Process group {} already gone: {}", group, e);
            }
        }

        let _ = child.kill();
        let _ = child.wait();

        Ok(())
    }
}

impl Drop for TargetHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
