//! IR operation variants and their content digests (§3, §4.9).
//!
//! Operations are a tagged sum, not a class hierarchy (§9): traversal
//! goes through [`OperationVisitor`] rather than dynamic dispatch on a
//! trait object per variant. `BTreeMap` is used wherever field order
//! would otherwise leak into the content digest.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

use super::port::PortSpec;

/// Where an `Image` operation's rootfs comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    /// Pulled from a registry reference, e.g. `docker.io/library/alpine:3`.
    Registry {
        /// The image reference.
        reference: String,
    },
    /// An empty rootfs.
    Scratch,
    /// A local OCI layout directory.
    OciLayout {
        /// Path to the layout root.
        path: PathBuf,
    },
    /// A local tarball rootfs.
    Tarball {
        /// Path to the tarball.
        path: PathBuf,
    },
}

/// `Image` operation: establishes a stage's base rootfs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOperation {
    /// Where the rootfs is sourced from.
    pub source: ImageSource,
}

/// Network mode for an `Exec` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecNetworkMode {
    /// No network namespace.
    None,
    /// Share the host network namespace.
    Host,
    /// An isolated, sandboxed network.
    Sandbox,
}

/// Security posture for an `Exec` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityMode {
    /// Default confinement.
    Default,
    /// Relaxed confinement, e.g. for privileged build steps.
    Insecure,
}

/// Where a mount's source content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountSource {
    /// The final filesystem state produced by a named stage.
    Stage {
        /// Source stage id.
        stage_id: String,
    },
    /// The build context.
    Context,
    /// A named, persistent cache mount.
    Cache {
        /// Cache mount id, shared across builds that reference it.
        id: String,
    },
}

/// One mount attached to an `Exec` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount source.
    pub source: MountSource,
    /// Path within the source to mount.
    pub source_path: String,
    /// Destination path inside the exec environment.
    pub destination: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

/// `Exec` operation: runs a command against the accumulated filesystem
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOperation {
    /// Command and arguments.
    pub command: Vec<String>,
    /// Environment variables, sorted for a stable digest.
    pub env: BTreeMap<String, String>,
    /// Mounts available during execution.
    pub mounts: Vec<Mount>,
    /// Working directory, if overridden.
    pub workdir: Option<String>,
    /// User to run as, if overridden.
    pub user: Option<String>,
    /// Network mode.
    pub network_mode: ExecNetworkMode,
    /// Security posture.
    pub security: SecurityMode,
}

/// Filesystem mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsAction {
    /// Copy a source tree or file to a destination.
    Copy,
    /// Add a source (which may be a remote URL or archive) to a
    /// destination, auto-extracting archives.
    Add,
    /// Remove a path.
    Remove,
    /// Create a directory.
    Mkdir,
    /// Create a symbolic link.
    Symlink,
    /// Create a hard link.
    Hardlink,
}

/// Where a `Filesystem` operation's source content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsSource {
    /// A path within a named stage's filesystem state.
    Stage {
        /// Source stage id.
        stage_id: String,
        /// Path within that stage.
        path: String,
    },
    /// A path within the build context.
    Context {
        /// Path within the context.
        path: String,
    },
    /// No source path (used by `Remove`/`Mkdir`/`Symlink` targets that
    /// only need a destination).
    None,
}

/// Ownership/permission metadata applied to a `Filesystem` operation's
/// result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsMetadata {
    /// `user[:group]` owner string, if overridden.
    pub owner: Option<String>,
    /// Octal permission mode, if overridden.
    pub mode: Option<u32>,
}

/// `Filesystem` operation: mutates the accumulated filesystem state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemOperation {
    /// Mutation kind.
    pub action: FsAction,
    /// Source content, when the action needs one.
    pub source: FsSource,
    /// Destination path.
    pub destination: String,
    /// Ownership/permission overrides.
    pub metadata: FsMetadata,
}

/// `Metadata` operation: mutates the accumulated image configuration
/// without touching the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataOperation {
    /// Set an environment variable.
    Env {
        /// Variable name.
        key: String,
        /// Variable value.
        value: String,
    },
    /// Set an image label.
    Label {
        /// Label key.
        key: String,
        /// Label value.
        value: String,
    },
    /// Declare a build argument.
    Arg {
        /// Argument name.
        name: String,
        /// Default value, if any.
        default: Option<String>,
    },
    /// Document an exposed port.
    Expose {
        /// The port being exposed.
        port: PortSpec,
    },
    /// Set the working directory.
    Workdir {
        /// Working directory path.
        path: String,
    },
    /// Set the default user.
    User {
        /// User spec.
        user: String,
    },
    /// Set the entrypoint.
    Entrypoint {
        /// Entrypoint argv.
        args: Vec<String>,
    },
    /// Set the default command.
    Cmd {
        /// Command argv.
        args: Vec<String>,
    },
    /// Set the shell used to interpret shell-form commands.
    Shell {
        /// Shell argv.
        args: Vec<String>,
    },
    /// Configure a healthcheck.
    Healthcheck {
        /// Probe command.
        command: Vec<String>,
        /// Interval between probes, in seconds.
        interval_secs: u64,
        /// Per-probe timeout, in seconds.
        timeout_secs: u64,
        /// Consecutive failures before unhealthy.
        retries: u32,
    },
    /// Set the stop signal.
    StopSignal {
        /// Signal name, e.g. `"SIGTERM"`.
        signal: String,
    },
    /// Declare a volume mount point.
    Volume {
        /// Mount point path.
        path: String,
    },
    /// Register an `ON_BUILD` trigger instruction for downstream builds.
    OnBuild {
        /// The trigger instruction, verbatim.
        instruction: String,
    },
}

/// The sum-type tag for one node's work (§3 GLOSSARY: Operation kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Establishes a stage's base rootfs.
    Image(ImageOperation),
    /// Runs a command.
    Exec(ExecOperation),
    /// Mutates the filesystem.
    Filesystem(FilesystemOperation),
    /// Mutates accumulated image configuration.
    Metadata(MetadataOperation),
}

impl Operation {
    /// Content digest of this operation alone (no dependency inputs).
    /// Deterministic because every field that could vary in iteration
    /// order is a `BTreeMap` or a `Vec` built in a fixed order by the
    /// builder.
    #[must_use]
    pub fn content_digest(&self) -> Digest {
        let bytes = serde_json::to_vec(self).expect("Operation serialization cannot fail");
        Digest::of(&bytes)
    }

    /// Dispatch to the matching [`OperationVisitor`] method.
    pub fn accept<R>(&self, visitor: &mut dyn OperationVisitor<R>) -> R {
        match self {
            Operation::Image(op) => visitor.visit_image(op),
            Operation::Exec(op) => visitor.visit_exec(op),
            Operation::Filesystem(op) => visitor.visit_filesystem(op),
            Operation::Metadata(op) => visitor.visit_metadata(op),
        }
    }

    /// A short, human-readable kind label, for events and diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Image(_) => "image",
            Operation::Exec(_) => "exec",
            Operation::Filesystem(_) => "filesystem",
            Operation::Metadata(_) => "metadata",
        }
    }
}

/// Exhaustive traversal contract over [`Operation`] variants (§9: a
/// visitor, not a class hierarchy).
pub trait OperationVisitor<R> {
    /// Visit an `Image` operation.
    fn visit_image(&mut self, op: &ImageOperation) -> R;
    /// Visit an `Exec` operation.
    fn visit_exec(&mut self, op: &ExecOperation) -> R;
    /// Visit a `Filesystem` operation.
    fn visit_filesystem(&mut self, op: &FilesystemOperation) -> R;
    /// Visit a `Metadata` operation.
    fn visit_metadata(&mut self, op: &MetadataOperation) -> R;
}
