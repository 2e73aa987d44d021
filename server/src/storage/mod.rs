//! Storage core
//!
//! Uploads are split into contiguous byte ranges ([`splitter`]) and placed on
//! registered backends ([`placement`]) through a common transport contract
//! ([`transport`]). Downloads stitch the chunks back together
//! ([`reassembler`], [`download`]).

pub mod download;
pub mod placement;
pub mod reassembler;
pub mod registry;
pub mod splitter;
pub mod transport;

pub use placement::{ItemSource, PlacementService, PlacementSettings};
pub use registry::{BackendRegistry, Registration};
