pub mod engine;
pub mod geo;
pub mod pipeline;
pub mod rate_limit;
pub mod resolver;
pub mod rules;

pub use engine::RuleEngine;
pub use pipeline::{Outcome, Pipeline, Verdict};
pub use rate_limit::RateLimiter;
