//! Fabric topology module.
//!
//! Declarative descriptors, the built-in shapes, validation into an
//! immutable `Topology`, and the builder that realises it on a platform.

pub mod builder;
pub mod shapes;
pub mod types;
pub mod validate;

pub use builder::{build, configure_forwarding, BuildError};
pub use shapes::Shape;
pub use types::{Link, LinkParams, Node, NodeRole, SwitchOptions, Tier, TopologyDescriptor};
pub use validate::{Topology, TopologyError};
