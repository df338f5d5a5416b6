//! Storage layer: the object store seam, the shipped local store, and the
//! per-identity namespace abstraction built on top of it.

pub mod backend;
pub mod context;
pub mod error;
pub mod link_signer;
pub mod local_backend;
pub mod storage_factory;
pub mod user_storage;

#[cfg(test)]
pub(crate) mod testing;
