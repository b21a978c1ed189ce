//! Replication and verification engines.
//!
//! [full] copies existing collections (with [metadata] and [index] helpers), [feed] keeps the
//! target following the source, [validate] proves both sides agree.  [Mirror] wires them together.

pub mod feed;
pub mod full;
pub mod index;
pub mod metadata;
mod syncer;
pub mod validate;

pub use syncer::{Mirror, MirrorReport};
pub use validate::Difference;
