//! Identities of registries, images, digests, and tags

#[cfg(test)] mod tests;

mod digest;
mod name;
mod registry;
mod tag;

pub use digest::ContentDigest;
pub use name::ImageName;
pub use registry::RegistryName;
pub use tag::Tag;
