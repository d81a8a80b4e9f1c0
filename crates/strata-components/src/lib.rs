//! Component version resolution and blueprint resolution for Strata
//!
//! - [`ComponentResolver`] / [`BlobResolver`]: the registry contract
//! - [`CachedResolver`]: write-once component version cache
//! - [`LocalRegistry`]: closed in-memory (or on-disk) component set
//! - [`transitive_component_references`]: deduplicating transitive closure
//! - [`blueprint`]: blueprint descriptors, filesystems, the fetch pipe and cache

pub mod blob;
pub mod blueprint;
pub mod cached;
pub mod overwrite;
pub mod registry;
pub mod resolver;
pub mod transitive;

pub use blob::{BlobInfo, MediaType};
pub use blueprint::{Blueprint, BlueprintFs, BlueprintResolver, BlueprintStore};
pub use cached::CachedResolver;
pub use overwrite::{Overwriter, Substitutions};
pub use registry::LocalRegistry;
pub use resolver::{BlobResolver, ComponentResolver};
pub use transitive::transitive_component_references;
