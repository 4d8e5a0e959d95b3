#[macro_use]
extern crate tracing;

mod app;
mod errors;
mod logging;
pub mod scenario;

pub use app::App;
pub use call_simulator_config::{
    Args,
    Config,
};
pub use errors::init_errors;
pub use logging::init_logging;
