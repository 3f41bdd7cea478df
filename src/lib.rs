pub mod catalog;
pub mod config;
pub mod executor;
pub mod generate;
pub mod logging;
pub mod model;
pub mod ratelimit;
pub mod registrants;
pub mod traits;

// Re-export common types for convenience
pub use config::*;
pub use executor::*;
pub use model::*;
pub use traits::*;

pub use catalog::{into_stages, load_stages, CatalogEntry, Tier};
pub use generate::{Generator, RunContext, RunSummary, Stage};
pub use logging::{init_tracing, LogFormat};
pub use ratelimit::{BackoffPolicy, RateLimiter};
pub use registrants::RegistrantRegistry;
