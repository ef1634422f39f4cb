// Container sandbox using Bollard: one throwaway container per submission

use crate::config::HarnessConfig;
use crate::engine::{CappedBuffer, Payload, Sandbox, SandboxOutput, DRIVER_SOURCE, OUTPUT_LIMIT_MARKER};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Linux caps a single environment string at 128 KiB.
const MAX_ENV_VALUE_BYTES: usize = 120 * 1024;

/// Largest raw value whose base64 form fits `MAX_ENV_VALUE_BYTES`.
pub const MAX_PAYLOAD_BYTES: usize = MAX_ENV_VALUE_BYTES / 4 * 3;

/// Decodes and runs the driver from the environment.
const BOOTSTRAP: &str = "import base64,os;exec(compile(base64.b64decode(os.environ['VERITY_DRIVER']),'driver.py','exec'))";

/// Container cleanup guard - guarantees container removal on drop
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self { docker, container_id }
    }
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        // Drop cannot await; removal runs on the runtime
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "⚠ Failed to clean up container");
            }
        });
    }
}

/// Docker-based sandbox
///
/// **Container Rules:**
/// 1. Image pulled on first use
/// 2. Network disabled, memory and CPU capped
/// 3. Driver, submission and plan passed base64-encoded in the environment
/// 4. Logs collected until exit, each stream capped; killed on timeout or
///    when a stream passes the cap
/// 5. Removed by a drop guard
pub struct DockerSandbox {
    docker: Docker,
    image: String,
    memory_limit_mb: u32,
    cpu_limit: f32,
    max_output_bytes: usize,
}

impl DockerSandbox {
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        Ok(Self {
            docker,
            image: config.docker_image.clone(),
            memory_limit_mb: config.memory_limit_mb,
            cpu_limit: config.cpu_limit,
            max_output_bytes: config.max_output_bytes,
        })
    }

    async fn ensure_image(&self) -> Result<()> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!("✓ Image cache hit: {}", self.image);
            return Ok(());
        }

        warn!("⚠ Image cache miss: {} (pulling now)", self.image);

        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!("✓ Image pulled successfully: {}", self.image);
        Ok(())
    }
}

/// `KEY=base64(value)` pairs for the container environment.
fn encode_env(payload: &Payload) -> Result<Vec<String>> {
    let mut env = Vec::with_capacity(3);
    for (key, value) in [
        ("VERITY_DRIVER", DRIVER_SOURCE),
        ("VERITY_SOURCE", payload.source.as_str()),
        ("VERITY_PLAN", payload.plan.as_str()),
    ] {
        let encoded = general_purpose::STANDARD.encode(value);
        if encoded.len() > MAX_ENV_VALUE_BYTES {
            bail!(
                "{} is {} bytes encoded, above the {} byte container environment limit",
                key,
                encoded.len(),
                MAX_ENV_VALUE_BYTES
            );
        }
        env.push(format!("{}={}", key, encoded));
    }
    env.push("PYTHONIOENCODING=utf-8".to_string());
    Ok(env)
}

impl Sandbox for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn payload_limit(&self) -> Option<usize> {
        Some(MAX_PAYLOAD_BYTES)
    }

    #[tracing::instrument(skip_all, fields(image = %self.image, timeout_ms = timeout.as_millis() as u64))]
    async fn run(&self, payload: &Payload, timeout: Duration) -> Result<SandboxOutput> {
        let env = encode_env(payload)?;

        self.ensure_image()
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", self.image))?;

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "python".to_string(),
                "-I".to_string(),
                "-S".to_string(),
                "-c".to_string(),
                BOOTSTRAP.to_string(),
            ]),
            env: Some(env),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(i64::from(self.memory_limit_mb) * 1024 * 1024),
                nano_cpus: Some((f64::from(self.cpu_limit) * 1_000_000_000.0) as i64),
                network_mode: Some("none".to_string()),
                pids_limit: Some(64),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_name = format!("verity-{}", uuid::Uuid::new_v4());
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .context("Failed to create Docker container")?;

        let container_id = container.id.clone();
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        let start = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let execution = async {
            let mut stdout = CappedBuffer::new(self.max_output_bytes);
            let mut stderr = CappedBuffer::new(self.max_output_bytes);

            let mut logs = self.docker.logs(
                &container_id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    follow: true,
                    ..Default::default()
                }),
            );

            while let Some(output) = logs.next().await {
                let within_cap = match output {
                    Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                    Ok(_) => true,
                    Err(e) => {
                        warn!(error = %e, "⚠ Error reading container logs");
                        break;
                    }
                };
                if !within_cap {
                    warn!(cap = self.max_output_bytes, "⚠ Container output passed the cap - killing container");
                    if let Err(e) = self
                        .docker
                        .kill_container(&container_id, None::<KillContainerOptions<String>>)
                        .await
                    {
                        warn!(error = %e, "⚠ Failed to kill flooding container");
                    }
                    break;
                }
            }

            let mut wait = self
                .docker
                .wait_container(&container_id, Some(WaitContainerOptions { condition: "not-running" }));
            let exit_code = match wait.next().await {
                Some(Ok(response)) => Some(response.status_code),
                // bollard reports non-zero exits as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
                Some(Err(e)) => {
                    warn!(error = %e, "⚠ Failed to get container exit code");
                    None
                }
                None => None,
            };

            (stdout, stderr, exit_code)
        };

        match tokio::time::timeout(timeout, execution).await {
            Ok((stdout, stderr, exit_code)) => {
                let output_exceeded = stdout.overflowed() || stderr.overflowed();
                let mut stderr = stderr.into_string();
                if output_exceeded {
                    stderr.push('\n');
                    stderr.push_str(OUTPUT_LIMIT_MARKER);
                } else if exit_code == Some(137) {
                    stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]");
                }
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(exit_code = ?exit_code, elapsed_ms, "Container exited");

                Ok(SandboxOutput {
                    exit_code,
                    stdout: stdout.into_string(),
                    stderr,
                    timed_out: false,
                    output_exceeded,
                    elapsed_ms,
                })
            }
            Err(_) => {
                warn!("⚠ Execution timed out after {}ms - killing container", timeout.as_millis());
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(error = %e, "⚠ Failed to kill timed-out container");
                }

                Ok(SandboxOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::from("[Execution timed out]"),
                    timed_out: true,
                    output_exceeded: false,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_is_base64() {
        let payload = Payload {
            source: "def f():\n    return 1\n".to_string(),
            plan: "{}".to_string(),
        };
        let env = encode_env(&payload).unwrap();
        let source = env.iter().find_map(|e| e.strip_prefix("VERITY_SOURCE=")).unwrap();
        let decoded = general_purpose::STANDARD.decode(source).unwrap();
        assert_eq!(decoded, payload.source.as_bytes());
        assert!(env.iter().any(|e| e.starts_with("VERITY_DRIVER=")));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = Payload {
            source: "x = 1\n".repeat(30_000),
            plan: "{}".to_string(),
        };
        let err = encode_env(&payload).unwrap_err();
        assert!(err.to_string().contains("VERITY_SOURCE"));
    }

    #[test]
    fn test_payload_limit_fits_environment() {
        let payload = Payload {
            source: "x".repeat(MAX_PAYLOAD_BYTES),
            plan: "p".repeat(MAX_PAYLOAD_BYTES),
        };
        assert!(encode_env(&payload).is_ok());

        let payload = Payload {
            source: "x".repeat(MAX_PAYLOAD_BYTES + 1),
            plan: "{}".to_string(),
        };
        assert!(encode_env(&payload).is_err());
    }
}
