//! Design mapper: hot-reloadable brand/style dictionary, property merging,
//! and the `/v1/map` + `/v1/reload` REST surface.

pub mod loader;
pub mod merge;
pub mod routes;

pub use loader::{Mappings, MappingsLoader};
pub use merge::{map_request, MapRequest, MapResponse};
