//! Ephemeral capsule lifecycle management.
//!
//! Provisions and tears down the worker containers that host
//! attacker/defender agents when a run supplies a bare model identifier
//! instead of an endpoint. The container runtime is driven through its
//! CLI; in environments without one, provisioning degrades to a
//! clearly-marked placeholder endpoint and release is a no-op; callers
//! must not assume a provisioned endpoint is live.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Result, Role, SkirmishError};

const CEREBRAS_CAPSULE_IMAGE: &str = "skirmish-cerebras-capsule:latest";
const HF_CAPSULE_IMAGE: &str = "skirmish-hf-capsule:latest";

/// Internal port every capsule image listens on.
const CAPSULE_PORT: u16 = 8080;

/// Marker host for endpoints handed out without a container runtime.
pub const PLACEHOLDER_HOST: &str = "capsule-unavailable";

/// A provisioned worker: where to reach it and how to tear it down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedCapsule {
    /// Externally reachable base URL.
    pub endpoint: String,
    /// Opaque teardown handle (the container name).
    pub handle: String,
}

impl ProvisionedCapsule {
    /// True when this capsule was handed out without a live runtime.
    pub fn is_placeholder(&self) -> bool {
        self.endpoint.contains(PLACEHOLDER_HOST)
    }
}

/// Runtime probe result, cached after the first check.
const RUNTIME_UNKNOWN: u8 = 0;
const RUNTIME_PRESENT: u8 = 1;
const RUNTIME_ABSENT: u8 = 2;

/// Starts and stops ephemeral capsule containers.
pub struct CapsuleLifecycle {
    runtime_state: AtomicU8,
}

impl Default for CapsuleLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl CapsuleLifecycle {
    pub fn new() -> Self {
        Self {
            runtime_state: AtomicU8::new(RUNTIME_UNKNOWN),
        }
    }

    /// Select the worker image from a substring of the model identifier.
    fn image_for(model: &str) -> &'static str {
        if model.to_lowercase().contains("cerebras") {
            CEREBRAS_CAPSULE_IMAGE
        } else {
            HF_CAPSULE_IMAGE
        }
    }

    /// Start an ephemeral worker hosting `model` for `role`.
    ///
    /// The container exposes its internal port on a dynamically allocated
    /// host port; the returned endpoint points at that port.
    pub async fn provision(&self, model: &str, role: Role) -> Result<ProvisionedCapsule> {
        let image = Self::image_for(model);
        let uuid = Uuid::new_v4().simple().to_string();
        let name = format!("{role}-{}-{}", model.replace('/', "-"), &uuid[..6]);

        if !self.runtime_available().await {
            warn!(event = "lifecycle.no_runtime", model = %model, role = %role);
            return Ok(ProvisionedCapsule {
                endpoint: format!("http://{PLACEHOLDER_HOST}/{name}"),
                handle: name,
            });
        }

        info!(event = "lifecycle.provision", model = %model, image = %image, role = %role);

        let run = Command::new("docker")
            .args([
                "run",
                "-d",
                "--name",
                &name,
                "-e",
                &format!("MODEL_NAME={model}"),
                "-e",
                &format!("ROLE={role}"),
                "-p",
                &format!("127.0.0.1:0:{CAPSULE_PORT}"),
                image,
            ])
            .output()
            .await?;
        if !run.status.success() {
            return Err(SkirmishError::Lifecycle(format!(
                "docker run failed for {name}: {}",
                String::from_utf8_lossy(&run.stderr).trim()
            )));
        }

        let port = self.host_port(&name).await?;
        let endpoint = format!("http://127.0.0.1:{port}");
        info!(event = "lifecycle.started", handle = %name, endpoint = %endpoint);

        Ok(ProvisionedCapsule {
            endpoint,
            handle: name,
        })
    }

    /// Stop and remove a worker. Best-effort: failures are logged, never
    /// propagated.
    pub async fn release(&self, handle: &str) {
        if !self.runtime_available().await {
            return;
        }
        for verb in ["stop", "rm"] {
            match Command::new("docker").args([verb, handle]).output().await {
                Ok(output) if output.status.success() => {}
                Ok(output) => warn!(
                    event = "lifecycle.release_failed",
                    handle = %handle,
                    step = verb,
                    error = %String::from_utf8_lossy(&output.stderr).trim(),
                ),
                Err(err) => warn!(
                    event = "lifecycle.release_failed",
                    handle = %handle,
                    step = verb,
                    error = %err,
                ),
            }
        }
        info!(event = "lifecycle.released", handle = %handle);
    }

    /// Resolve the dynamically allocated host port for a container.
    async fn host_port(&self, name: &str) -> Result<u16> {
        let output = Command::new("docker")
            .args(["port", name, &CAPSULE_PORT.to_string()])
            .output()
            .await?;
        if !output.status.success() {
            return Err(SkirmishError::Lifecycle(format!(
                "docker port failed for {name}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        // Output looks like "127.0.0.1:49153" (possibly several lines).
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .filter_map(|line| line.rsplit(':').next())
            .find_map(|port| port.trim().parse::<u16>().ok())
            .ok_or_else(|| {
                SkirmishError::Lifecycle(format!(
                    "could not parse host port for {name} from '{}'",
                    stdout.trim()
                ))
            })
    }

    async fn runtime_available(&self) -> bool {
        match self.runtime_state.load(Ordering::Relaxed) {
            RUNTIME_PRESENT => return true,
            RUNTIME_ABSENT => return false,
            _ => {}
        }
        let available = Command::new("docker")
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false);
        self.runtime_state.store(
            if available {
                RUNTIME_PRESENT
            } else {
                RUNTIME_ABSENT
            },
            Ordering::Relaxed,
        );
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_selection_by_model_substring() {
        assert_eq!(
            CapsuleLifecycle::image_for("cerebras/llama-4-scout"),
            CEREBRAS_CAPSULE_IMAGE
        );
        assert_eq!(CapsuleLifecycle::image_for("gpt2"), HF_CAPSULE_IMAGE);
    }

    #[tokio::test]
    async fn test_placeholder_without_runtime() {
        let lifecycle = CapsuleLifecycle::new();
        // Force the probe result rather than touching the host runtime.
        lifecycle
            .runtime_state
            .store(RUNTIME_ABSENT, Ordering::Relaxed);

        let capsule = lifecycle.provision("gpt2", Role::Attack).await.unwrap();
        assert!(capsule.is_placeholder());
        assert!(capsule.endpoint.starts_with("http://capsule-unavailable/"));
        assert!(capsule.handle.starts_with("attack-gpt2-"));

        // Release without a runtime is a no-op.
        lifecycle.release(&capsule.handle).await;
    }
}
