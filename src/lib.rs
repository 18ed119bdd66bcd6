//! # Depot
//!
//! An artifact repository: immutable binary files grouped into named,
//! versioned filesets, advanced through a gated release lifecycle
//! (untested → testing → tested → approved → released, or withdrawn),
//! with every mutation checked against per-user capabilities. Usable both
//! as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! depot = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use depot::repo::Depot;
//!
//! Depot::init("./store", 1046, "builder")?;
//! let depot = Depot::open("./store")?;
//! let fileset = depot.add_fileset(1046, "build-321", "1.0", "deadbeef")?;
//! // ...
//! depot.close()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the CLI binary. Disable with
//!   `default-features = false`.

pub mod config;
pub mod content;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod perm;
pub mod repo;
pub mod store;
pub mod types;
