//! Command line argument parsing (§1.1: "a thin `clap`-based front end").
//!
//! Grounded on the teacher's `cli/args.rs` (`Args` + `Commands` subcommand
//! enum, per-subcommand `ClapArgs` struct with a `validate()` method).

use crate::error::{OciPkgError, Result};
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ocipkg",
    version,
    about = "OCI unikernel packaging engine — pack, push, pull, list, and remove Unikraft images"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Package a built kernel (and optional initrd) as an OCI index/manifest.
    Pack(PackArgs),
    /// Push a locally-stored index (and its dependencies) to a registry.
    Push(PushArgs),
    /// Pull an index or manifest from a registry into the local store.
    Pull(PullArgs),
    /// List indexes in the local catalog.
    Ls(LsArgs),
    /// Remove a manifest or an entire index from the local store.
    Rm(RmArgs),
}

impl Args {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn try_parse() -> Result<Self> {
        <Self as Parser>::try_parse()
            .map_err(|e| OciPkgError::Validation(format!("failed to parse arguments: {e}")))
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PackArgs {
    /// Path to the built kernel binary.
    #[arg(long, value_name = "FILE")]
    pub kernel: PathBuf,

    /// Path to a debug (unstripped) kernel binary.
    #[arg(long, value_name = "FILE")]
    pub kernel_dbg: Option<PathBuf>,

    /// Path to an initrd/rootfs archive.
    #[arg(long, value_name = "FILE")]
    pub initrd: Option<PathBuf>,

    /// Target architecture, e.g. `x86_64`, `arm64`.
    #[arg(long)]
    pub arch: String,

    /// Target platform, e.g. `linux`, `kvm`, `xen`.
    #[arg(long)]
    pub platform: String,

    /// Kernel version recorded on the manifest.
    #[arg(long)]
    pub kernel_version: Option<String>,

    /// Comma-separated kconfig entries (`CONFIG_FOO=y,CONFIG_BAR=1`).
    #[arg(long, value_delimiter = ',')]
    pub kconfig: Vec<String>,

    /// Skip packaging kconfig entries as `os.features`.
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_kconfig: bool,

    /// Pack the debug kernel layer when `--kernel-dbg` is given.
    #[arg(long, action = ArgAction::SetTrue)]
    pub pack_kernel_dbg: bool,

    /// Command line baked into the image config.
    #[arg(long, value_delimiter = ' ')]
    pub cmd: Vec<String>,

    /// How to reconcile a collision with an existing manifest at the same
    /// platform: `exit`, `merge`, or `overwrite`.
    #[arg(long, default_value = "merge")]
    pub merge_strategy: MergeStrategyArg,

    /// `[registry/]repository[:tag]` to package under.
    #[arg(long)]
    pub reference: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum MergeStrategyArg {
    Exit,
    Merge,
    Overwrite,
}

impl From<MergeStrategyArg> for crate::packager::MergeStrategy {
    fn from(value: MergeStrategyArg) -> Self {
        match value {
            MergeStrategyArg::Exit => crate::packager::MergeStrategy::Exit,
            MergeStrategyArg::Merge => crate::packager::MergeStrategy::Merge,
            MergeStrategyArg::Overwrite => crate::packager::MergeStrategy::Overwrite,
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PushArgs {
    /// `[registry/]repository[:tag|@digest]` to push.
    pub reference: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PullArgs {
    /// `[registry/]repository[:tag|@digest]` to pull.
    pub reference: String,

    /// Restrict the pull to manifests matching this OS.
    #[arg(long)]
    pub os: Option<String>,

    /// Restrict the pull to manifests matching this architecture.
    #[arg(long)]
    pub arch: Option<String>,

    /// Unpack the pulled (or selected) manifest into this directory.
    #[arg(long, value_name = "DIR")]
    pub unpack: Option<PathBuf>,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct LsArgs {
    /// Filter by repository name substring.
    #[arg(long)]
    pub name: Option<String>,

    /// Filter by tag.
    #[arg(long)]
    pub version: Option<String>,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RmArgs {
    /// `[registry/]repository[:tag|@digest]` to remove.
    pub reference: String,

    /// Remove a single manifest digest rather than the whole index.
    #[arg(long)]
    pub manifest: Option<String>,

    /// Also delete the manifests (and their blobs) referenced by the index.
    #[arg(long, action = ArgAction::SetTrue)]
    pub deps: bool,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Options shared by every subcommand that touches the content store.
#[derive(ClapArgs, Debug, Clone)]
pub struct StoreArgs {
    /// Root directory of the content store.
    #[arg(long, global = true, default_value = ".ocipkg")]
    pub root: PathBuf,

    /// Use the containerd-style store layout instead of the filesystem one.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub containerd: bool,

    /// Verbose (debug/trace-level) logging.
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Suppress non-essential output.
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    pub quiet: bool,
}
