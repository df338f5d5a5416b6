//! Data models for the file sharing service.
//!
//! `Object` mirrors a row of the object index, `Metadata` is the per-namespace
//! descriptor document and `FileEntry` is what listings hand back to callers.

pub mod file_entry;
pub mod metadata;
pub mod object;
