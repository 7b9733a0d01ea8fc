//! Flavor definitions: per-vendor wire formats, their endpoints and the
//! conversion pipelines to and from the canonical flavor.

pub mod definition;
mod endpoint;
mod error;
mod flavor;
mod registry;

pub use endpoint::Endpoint;
pub use error::FlavorError;
pub use flavor::{Conversion, Flavor, FlavorService, Stage};
pub use registry::{CANONICAL_FLAVOR, FlavorRegistry};
