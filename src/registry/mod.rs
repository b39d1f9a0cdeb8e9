//! Reading and mutating remote image registries

mod auth;
mod builder;
mod client;
mod memory;
mod ops;

pub use auth::{Auth, Credential};
pub use builder::RegistryClientBuilder;
pub use client::RegistryClient;
pub use memory::MemoryRegistry;
pub use ops::{edge_ops, DryRun, InventorySource, OpExecutor, RegistryOp};
