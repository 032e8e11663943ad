pub mod batch;
pub mod error;
pub mod executor;
pub mod flatten;
pub mod normalize;
pub mod partition;
pub mod pipeline;
pub mod plan;
