/// Tower middleware module
///
/// The admission pipeline runs as a Tower layer wrapped around the route
/// dispatcher, replacing per-handler security checks.
pub mod auth_pipeline;

pub use auth_pipeline::{
    AuthPipelineLayer, AuthPipelineService, apply_rate_headers, rejection_response,
};
