//! Step configuration model and parser.

pub mod parser;
pub mod types;

pub use parser::{parse_step_config, step_config_from_value, ParseOptions};
pub use types::*;
