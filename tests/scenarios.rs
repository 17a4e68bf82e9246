//! End-to-end scenarios against a temporary filesystem store (§8).
//!
//! Unit tests colocated with `packager` already cover S1-S4 (merge
//! strategy vs. platform collisions). These integration tests exercise
//! the round-trip, GC-closure, and idempotent-save properties, which
//! need the full `package -> pull/unpack -> delete` path through the
//! public API rather than a single module in isolation.

use kraftkit_ocipkg::concurrency::Budget;
use kraftkit_ocipkg::config::HostConfig;
use kraftkit_ocipkg::packager::{self, PackageOptions, Target};
use kraftkit_ocipkg::store::handler::Handler;
use kraftkit_ocipkg::store::{blob_io, FsStore};
use kraftkit_ocipkg::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn store(root: &std::path::Path) -> FsStore {
    FsStore::new(root, Arc::new(Transport::new(HostConfig::default())))
}

fn kernel_target(dir: &std::path::Path, bytes: &[u8]) -> Target {
    let path = dir.join("kernel");
    std::fs::write(&path, bytes).unwrap();
    Target {
        kernel_path: path,
        kernel_dbg_path: None,
        initrd_path: None,
        kconfig: vec!["CONFIG_APP=1".to_string()],
        architecture: "x86_64".to_string(),
        platform: "linux".to_string(),
        command: None,
    }
}

#[tokio::test]
async fn round_trip_preserves_kernel_bytes() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());
    let kernel_bytes = b"\x7fELF-fake-unikernel-body".to_vec();
    let target = kernel_target(dir.path(), &kernel_bytes);

    let (_, index) = packager::package(
        &store,
        Budget::default_for_host(),
        kraftkit_ocipkg::reference::DEFAULT_REGISTRY,
        &target,
        "registry.local/roundtrip:v1",
        &PackageOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(index.manifests().len(), 1);
    let manifest_digest =
        kraftkit_ocipkg::Digest::parse(index.manifests()[0].digest()).unwrap();

    let unpack_dir = dir.path().join("unpacked");
    let reference = kraftkit_ocipkg::Reference::parse("registry.local/roundtrip:v1", None, kraftkit_ocipkg::reference::DEFAULT_REGISTRY).unwrap();
    store
        .unpack_image(&reference, &manifest_digest, &unpack_dir)
        .await
        .unwrap();

    let restored = std::fs::read(unpack_dir.join("unikraft/bin/kernel")).unwrap();
    assert_eq!(restored, kernel_bytes);
}

#[tokio::test]
async fn gc_closure_removes_all_blobs_after_delete_with_deps() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());
    let target = kernel_target(dir.path(), b"unshared-kernel-bytes");

    let reference_name = "registry.local/gc-target:v1";
    packager::package(
        &store,
        Budget::default_for_host(),
        kraftkit_ocipkg::reference::DEFAULT_REGISTRY,
        &target,
        reference_name,
        &PackageOptions::default(),
    )
    .await
    .unwrap();

    let reference = kraftkit_ocipkg::Reference::parse(reference_name, None, kraftkit_ocipkg::reference::DEFAULT_REGISTRY).unwrap();
    store.delete_index(&reference, true).await.unwrap();

    assert!(store.resolve_index(&reference).await.is_err());
    assert!(store.list_manifests().await.unwrap().is_empty());

    let sha_dir = dir.path().join("digests").join("sha256");
    let remaining = match std::fs::read_dir(&sha_dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    };
    assert_eq!(remaining, 0, "no blob should survive a deps=true delete of its only index");
}

#[tokio::test]
async fn idempotent_blob_save_is_a_no_op_on_second_call() {
    let dir = tempdir().unwrap();
    let digests_root = dir.path().join("digests");
    let data = b"identical content, saved twice".to_vec();
    let digest = kraftkit_ocipkg::Digest::of_bytes(&data);

    blob_io::save_blob(&digests_root, &digest, &data).await.unwrap();
    let path = blob_io::blob_path(&digests_root, &digest);
    let first_write = std::fs::metadata(&path).unwrap().modified().unwrap();

    // A real clock tick so a re-write (if it happened) would be observable.
    tokio::time::sleep(Duration::from_millis(20)).await;
    blob_io::save_blob(&digests_root, &digest, &data).await.unwrap();
    let second_write = std::fs::metadata(&path).unwrap().modified().unwrap();

    assert_eq!(first_write, second_write, "second save_blob call must perform zero writes");
}
