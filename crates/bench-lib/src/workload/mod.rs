//! Request workload definition
//!
//! Labeled request templates, the per-run context handed to their
//! builders, and the weighted selector that picks one per scheduled tick.

mod context;
mod selector;
mod templates;

pub use context::{RequestContext, DEFAULT_ID_RANGE};
pub use selector::{WeightedEndpointSelector, TOTAL_WEIGHT};
pub use templates::{
    apply_weights, named_mix, read_mix, write_mix, BodyBuilder, EndpointTemplate, HttpMethod,
    PathBuilder,
};
