mod loader;
mod schema;

pub use loader::{load_from_file, load_from_str, load_rules_file, LoadError};
pub use schema::{AlertingSettings, ClusterSettings, EngineConfig};
