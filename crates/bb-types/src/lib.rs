pub mod config;
pub mod errors;
pub mod run;
pub mod spec;

pub use config::{load_config, parse_config};
pub use errors::*;
pub use run::*;
pub use spec::*;
