//! Storage modules for Urfs storage nodes
//!
//! Provides the flat object directory and the hash-to-object index.

pub mod object_index;
pub mod object_store;

pub use object_index::{ObjectIndex, StoredObject};
pub use object_store::{
    ContentHasher, ObjectStore, PendingObject, compute_hash, normalize_object_name,
};
