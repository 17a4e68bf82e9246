//! Required annotation keys (§6) for index and manifest objects.

/// Human-readable name this object was tagged by at save time.
pub const REF_NAME: &str = "org.opencontainers.image.ref.name";

/// RFC3339 creation timestamp (UTC).
pub const CREATED: &str = "org.opencontainers.image.created";

/// The digest form of the reference, when known.
pub const REVISION: &str = "org.opencontainers.image.revision";

/// Containerd-compatibility image-name annotation, set alongside `REF_NAME`
/// so containerd-native tooling recognises the tag without reading ours.
pub const CONTAINERD_IMAGE_NAME: &str = "io.containerd.image.name";

/// Marks an index/manifest as produced by this implementation. Its value is
/// the crate version. Absence on read means: fall back to generic OCI
/// handling, do not assume unikernel semantics.
pub const IMPLEMENTATION_VERSION: &str = "dev.kraftkit.ocipkg.version";

/// Present only on unikernel manifests. A catalog filter that finds a
/// manifest lacking this annotation treats it as "not a unikernel" and
/// skips it.
pub const KERNEL_VERSION: &str = "dev.kraftkit.ocipkg.kernel.version";
