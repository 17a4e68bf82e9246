//! Content-addressed storage backends implementing [`handler::Handler`]
//! (§9: "implemented twice, filesystem and containerd-style").

pub mod blob_io;
pub mod containerd;
pub mod fs;
pub mod handler;

pub use containerd::ContainerdStore;
pub use fs::FsStore;
pub use handler::{DigestInfo, Handler, PlatformSelector, ProgressFn, UnpackedImage};
