//! Subcommand orchestration (§1.1).
//!
//! Grounded on the teacher's `cli/runner.rs` (`Runner::new(args)` /
//! `async fn run(self)`, driving the library end to end and reporting
//! through plain progress lines) — here routed through [`crate::logging::Logger`]
//! instead of bare `println!`, per the ported logging module.

use crate::cli::args::{Args, Commands, LsArgs, PackArgs, PullArgs, PushArgs, RmArgs, StoreArgs};
use crate::concurrency::Budget;
use crate::config::HostConfig;
use crate::digest::Digest;
use crate::error::{OciPkgError, Result};
use crate::logging::Logger;
use crate::packager::{self, PackageOptions, Target};
use crate::reference::Reference;
use crate::resolver::{CatalogQuery, Resolver};
use crate::store::handler::{Handler, PlatformSelector};
use crate::store::{ContainerdStore, FsStore};
use crate::transport::Transport;
use std::sync::Arc;

/// Either storage backend behind the one [`Handler`] trait object, selected
/// once at start-up by `--containerd` (§9: "implemented twice").
enum Store {
    Fs(FsStore),
    Containerd(ContainerdStore),
}

impl Store {
    fn handler(&self) -> &dyn Handler {
        match self {
            Store::Fs(s) => s,
            Store::Containerd(s) => s,
        }
    }
}

pub struct Runner {
    args: Args,
    logger: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let logger = match Self::store_args(&args) {
            Some(s) if s.quiet => Logger::new_quiet(),
            Some(s) => Logger::new(s.verbose),
            None => Logger::default(),
        };
        Ok(Self { args, logger })
    }

    fn store_args(args: &Args) -> Option<&StoreArgs> {
        Some(match &args.command {
            Commands::Pack(a) => &a.store,
            Commands::Push(a) => &a.store,
            Commands::Pull(a) => &a.store,
            Commands::Ls(a) => &a.store,
            Commands::Rm(a) => &a.store,
        })
    }

    fn open_store(&self, store_args: &StoreArgs, host_config: HostConfig, transport: Arc<Transport>) -> Store {
        if store_args.containerd {
            let namespace = host_config.containerd_namespace().to_string();
            Store::Containerd(ContainerdStore::new(&store_args.root, namespace, transport))
        } else {
            Store::Fs(FsStore::new(&store_args.root, transport))
        }
    }

    pub async fn run(self) -> Result<()> {
        let host_config = HostConfig::load()?;
        let transport = Arc::new(Transport::new(host_config.clone()));

        match &self.args.command {
            Commands::Pack(a) => self.run_pack(a, host_config, transport).await,
            Commands::Push(a) => self.run_push(a, host_config, transport).await,
            Commands::Pull(a) => self.run_pull(a, host_config, transport).await,
            Commands::Ls(a) => self.run_ls(a, host_config, transport).await,
            Commands::Rm(a) => self.run_rm(a, host_config, transport).await,
        }
    }

    async fn run_pack(&self, a: &PackArgs, host_config: HostConfig, transport: Arc<Transport>) -> Result<()> {
        self.logger.section("Package");
        let default_registry = host_config.default_registry.clone();
        let store = self.open_store(&a.store, host_config, transport);

        let target = Target {
            kernel_path: a.kernel.clone(),
            kernel_dbg_path: a.kernel_dbg.clone(),
            initrd_path: a.initrd.clone(),
            kconfig: a.kconfig.clone(),
            architecture: a.arch.clone(),
            platform: a.platform.clone(),
            command: if a.cmd.is_empty() { None } else { Some(a.cmd.clone()) },
        };
        let options = PackageOptions {
            merge_strategy: a.merge_strategy.into(),
            pack_kconfig: !a.no_kconfig,
            pack_kernel_dbg: a.pack_kernel_dbg,
            kernel_version: a.kernel_version.clone(),
            created: None,
        };

        self.logger.step(&format!("packaging {} for {}/{}", a.reference, a.platform, a.arch));
        let (digest, index) = packager::package(
            store.handler(),
            Budget::default_for_host(),
            &default_registry,
            &target,
            &a.reference,
            &options,
        )
        .await?;

        self.logger.success(&format!("wrote index {digest} ({} manifest(s))", index.manifests().len()));
        Ok(())
    }

    async fn run_push(&self, a: &PushArgs, host_config: HostConfig, transport: Arc<Transport>) -> Result<()> {
        self.logger.section("Push");
        let default_registry = host_config.default_registry.clone();
        let store = self.open_store(&a.store, host_config, transport);
        let reference = Reference::parse(&a.reference, None, &default_registry)?;
        let index = store.handler().resolve_index(&reference).await?;
        let digest = index_digest(&index)?;

        self.logger.step(&format!("pushing {} ({} manifest(s))", reference, index.manifests().len()));
        store.handler().push_descriptor(&reference, &digest).await?;
        self.logger.success(&format!("pushed {reference}"));
        Ok(())
    }

    async fn run_pull(&self, a: &PullArgs, host_config: HostConfig, transport: Arc<Transport>) -> Result<()> {
        self.logger.section("Pull");
        let default_registry = host_config.default_registry.clone();
        let store = self.open_store(&a.store, host_config, transport.clone());
        let reference = Reference::parse(&a.reference, None, &default_registry)?;

        let selector = PlatformSelector {
            os: a.os.clone(),
            architecture: a.arch.clone(),
            os_features: Vec::new(),
        };

        self.logger.step(&format!("pulling {reference}"));
        let digest = match reference.digest() {
            Some(d) => d.clone(),
            None => {
                let (bytes, _) = transport.get_manifest(&reference, reference.tag().unwrap()).await?;
                Digest::of_bytes(&bytes)
            }
        };
        store
            .handler()
            .pull_digest(&reference, &digest, &selector, None, &Budget::default_for_host())
            .await?;
        self.logger.success(&format!("pulled {reference}"));

        if let Some(dest) = &a.unpack {
            let index = store.handler().resolve_index(&reference).await?;
            let manifest_digest = select_manifest(&index, &selector)?;
            let unpacked = store.handler().unpack_image(&reference, &manifest_digest, dest).await?;
            self.logger
                .success(&format!("unpacked {} into {}", unpacked.manifest_digest, unpacked.dest.display()));
        }
        Ok(())
    }

    async fn run_ls(&self, a: &LsArgs, host_config: HostConfig, transport: Arc<Transport>) -> Result<()> {
        self.logger.section("Catalog");
        let store = self.open_store(&a.store, host_config.clone(), transport.clone());
        let resolver = Resolver::new(host_config, transport);
        let query = CatalogQuery {
            name: a.name.clone(),
            version: a.version.clone(),
        };
        let packages = resolver.local_catalog(store.handler(), &query).await?;
        let lines: Vec<String> = packages
            .iter()
            .map(|p| {
                format!(
                    "{} ({} manifest(s), kernel versions: {})",
                    p.reference,
                    p.manifest_count,
                    if p.kernel_versions.is_empty() {
                        "none".to_string()
                    } else {
                        p.kernel_versions.join(", ")
                    }
                )
            })
            .collect();
        self.logger.list("local images", &lines);
        Ok(())
    }

    async fn run_rm(&self, a: &RmArgs, host_config: HostConfig, transport: Arc<Transport>) -> Result<()> {
        self.logger.section("Remove");
        let default_registry = host_config.default_registry.clone();
        let store = self.open_store(&a.store, host_config, transport);
        let reference = Reference::parse(&a.reference, None, &default_registry)?;

        if let Some(manifest) = &a.manifest {
            let digest = Digest::parse(manifest)?;
            store.handler().delete_manifest(&reference, &digest).await?;
            self.logger.success(&format!("removed manifest {digest} from {reference}"));
        } else {
            store.handler().delete_index(&reference, a.deps).await?;
            self.logger.success(&format!("removed index {reference}"));
        }
        Ok(())
    }
}

fn index_digest(index: &crate::oci::ImageIndex) -> Result<Digest> {
    Digest::of_json(index)
}

fn select_manifest(index: &crate::oci::ImageIndex, selector: &PlatformSelector) -> Result<Digest> {
    for desc in index.manifests() {
        let matches = match desc.platform() {
            Some(p) => selector.matches(p),
            None => selector.os.is_none() && selector.architecture.is_none(),
        };
        if matches {
            return Digest::parse(desc.digest());
        }
    }
    Err(OciPkgError::PlatformUnmatched(format!(
        "no manifest matched selector in {} manifest(s)",
        index.manifests().len()
    )))
}
