//! Tool version selection from session metadata.

pub mod metadata;
pub mod resolver;

pub use metadata::{MetaValue, Metadata};
pub use resolver::{ToolVersion, VersionResolver, VersionSelector};
