//! CLI domain: parse, route, and output only.
//! No transport logic; the route table hands finished executors to command services.

mod output;
mod parse;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use route::RunContext;
