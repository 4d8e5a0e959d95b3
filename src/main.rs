use call_simulator::{
    init_errors,
    init_logging,
    App,
    Args,
    Config,
};
use clap::Parser;
use color_eyre::Result;

fn main() -> Result<()> {
    init_errors()?;
    let args = Args::parse();
    let config = Config::new(&args)?;
    init_logging(if config.quiet { "warn" } else { config.log_filter.as_str() })?;
    App::new(config, &args.scenario)?.run()
}
