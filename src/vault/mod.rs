//! Vault Manager
//!
//! Owns vault lifecycle, address assignment and the balance cache, and
//! serializes mutating operations per vault.

pub mod locks;
pub mod manager;
pub mod types;

pub use locks::{VaultGuard, VaultLocks};
pub use manager::VaultManager;
pub use types::{
    CreateVaultRequest, UpdateVaultRequest, Vault, VaultBalance, VaultFilter, VaultStatus,
};
