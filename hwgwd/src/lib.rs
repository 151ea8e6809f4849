//! HWGW resource directory.
//!
//! Arbitrates exclusive host ownership between batch pipelines over the
//! port-based RPC transport, keeps share fillers on idle hosts, and
//! recycles reservations left behind by dead owners.

pub mod client;
pub mod directory;
pub mod filler;
pub mod service;

pub use client::DirectoryClient;
pub use directory::Directory;
pub use service::{DIRECTORY_ORIGIN, DirectoryService};
