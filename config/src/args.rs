use clap::Parser;
use std::path::PathBuf;

/// Replays a call scenario through the participant connection models.
#[derive(Parser, Debug, Clone)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Scenario file (yaml) describing participants and the events to replay.
    #[clap(value_name = "SCENARIO")]
    pub scenario: PathBuf,

    /// Optional directory to read `config.yaml` from instead of the default one.
    #[clap(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Tracing filter directive, e.g. `debug` or `call_simulator_model=trace`.
    /// `RUST_LOG` still takes precedence.
    #[clap(long, value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Only print the final participant summary.
    #[clap(long, action)]
    pub quiet: bool,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            if let Some(log_filter) = &self.log_filter {
                cache.insert("log_filter".to_string(), log_filter.clone().into());
            }
            if self.quiet {
                cache.insert("quiet".to_string(), true.into());
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let author = clap::crate_authors!();
    let config_dir_path = crate::get_config_dir().display().to_string();

    format!(
        "\
{}

Authors: {author}

Config directory: {config_dir_path}",
        clap::crate_version!()
    )
}
