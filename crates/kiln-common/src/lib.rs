//! Common types for Kiln: CRDs, status model, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod hash;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all Kiln custom resources
pub const KILN_API_GROUP: &str = "kiln.dev";

/// API version for all Kiln custom resources
pub const KILN_API_VERSION: &str = "kiln.dev/v1alpha1";

/// Label carrying the entity ID on every object Kiln creates
pub const ENTITY_ID_LABEL: &str = "kiln.dev/entity-id";

/// Label carrying the entity kind on every object Kiln creates
pub const ENTITY_KIND_LABEL: &str = "kiln.dev/entity-kind";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "kiln-controller";
