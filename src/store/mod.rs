//! Per-owner coordination state
//!
//! `OwnerStore` maps owners to records without keeping them alive;
//! `CallTable` and `Fingerprint` key per-owner records on argument lists.

pub mod fingerprint;
pub mod owner_store;
pub mod table;

pub use fingerprint::Fingerprint;
pub use owner_store::OwnerStore;
pub use table::CallTable;
