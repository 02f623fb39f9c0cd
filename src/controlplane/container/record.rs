//! Container record and lifecycle state machine (§3, §4.6).
//!
//! ```text
//! Dead ──start──▶ Alive ──exit──▶ Exited
//!  │                 │              │
//!  └─delete──────────┴─delete──────▶ ∅
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

/// A handle to the externally-supervised runtime process backing one
/// `Alive`/`Exited` container. Implemented by the runtime plugin
/// binding; a fake is provided for tests.
#[async_trait]
pub trait RuntimeHandle: Send + Sync {
    /// Current status as observed from the helper process.
    async fn status(&self) -> Result<RuntimeStatus>;

    /// Request the helper stop the container's init process.
    async fn stop(&self, options: &StopOptions) -> Result<()>;

    /// The networks this running container is currently attached to.
    async fn networks(&self) -> Result<Vec<String>>;
}

/// Point-in-time status reported by a [`RuntimeHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    /// The init process is starting but not yet confirmed running.
    Starting,
    /// The init process is running.
    Running,
    /// A stop has been requested and is in flight.
    Stopping,
    /// The init process has exited with the given code.
    Exited(i32),
}

/// Options accompanying a `stop` request.
#[derive(Debug, Clone, Default)]
pub struct StopOptions {
    /// Grace period before escalating to a forced kill, if the runtime
    /// plugin supports one.
    pub timeout: Option<std::time::Duration>,
    /// Signal name to send, runtime-plugin-defined (defaults to the
    /// plugin's normal stop signal when `None`).
    pub signal: Option<String>,
}

/// Per-container configuration supplied at `create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Name of the runtime plugin that will host this container.
    pub runtime_handler: String,
    /// Image reference the rootfs was cloned from.
    pub image_reference: String,
    /// Target platform, e.g. `"linux/arm64"`.
    pub platform: String,
    /// The init process to execute inside the container.
    pub init_process: InitProcessConfig,
    /// Network ids this container should be attached to.
    pub networks: Vec<String>,
}

/// The init process started inside a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitProcessConfig {
    /// Executable path inside the rootfs.
    pub executable: String,
    /// Arguments passed to the executable.
    pub arguments: Vec<String>,
    /// Environment variables.
    pub environment: HashMap<String, String>,
    /// Working directory inside the rootfs.
    pub working_directory: Option<String>,
    /// User to run as, runtime-plugin-defined form.
    pub user: Option<String>,
}

/// Options controlling lifecycle behavior, persisted alongside the
/// config at `options.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerOptions {
    /// Destroy the bundle and record automatically when the container
    /// exits.
    pub auto_remove: bool,
}

/// The lifecycle state of one container record.
pub enum ContainerState {
    /// No helper process is registered.
    Dead,
    /// A helper process is registered and presumed running.
    Alive(Arc<dyn RuntimeHandle>),
    /// The helper process has exited with the given code.
    Exited(i32),
}

impl std::fmt::Debug for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Dead => write!(f, "Dead"),
            ContainerState::Alive(_) => write!(f, "Alive"),
            ContainerState::Exited(code) => write!(f, "Exited({code})"),
        }
    }
}

/// One entry in the container service's map.
pub struct ContainerRecord {
    /// Unique id, matching entity-name rules.
    pub id: String,
    /// Immutable creation-time configuration.
    pub config: ContainerConfig,
    /// Lifecycle options.
    pub options: ContainerOptions,
    /// Current lifecycle state.
    pub state: ContainerState,
}

impl ContainerRecord {
    /// A freshly created record, in the `Dead` state.
    #[must_use]
    pub fn new(id: String, config: ContainerConfig, options: ContainerOptions) -> Self {
        Self {
            id,
            config,
            options,
            state: ContainerState::Dead,
        }
    }

    /// A coarse status label suitable for listing, independent of
    /// whether a live query to the helper succeeded.
    #[must_use]
    pub fn coarse_status(&self) -> &'static str {
        match self.state {
            ContainerState::Dead => "stopped",
            ContainerState::Alive(_) => "running",
            ContainerState::Exited(_) => "exited",
        }
    }
}
