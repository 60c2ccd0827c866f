pub mod config;
pub mod detect;
pub mod rules;
pub mod serve;

pub use config::ConfigArgs;
pub use detect::DetectArgs;
pub use rules::RulesArgs;
pub use serve::ServeArgs;
