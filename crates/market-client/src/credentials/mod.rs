//! Credential persistence.
//!
//! - [`CredentialPair`]: the access/refresh bearer pair
//! - [`StorageKey`]: fixed keys of the persisted entries
//! - [`CredentialStore`]: async persistence trait
//! - [`FileCredentialStore`] / [`MemoryCredentialStore`]: implementations

mod file;
mod memory;
mod store;
mod types;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
pub use store::CredentialStore;
pub use types::{CredentialPair, StorageKey};
