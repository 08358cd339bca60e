//! Vela Query
//!
//! Named, read-only views over the control plane's records. A view takes a
//! JSON parameter object and returns a JSON document; failures come back as
//! `{"error": "..."}` so callers can always render the result.

mod engine;
mod error;

pub use error::QueryError;
pub use engine::{QueryEngine, ResourceFilter, views};
