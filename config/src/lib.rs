#[macro_use]
extern crate tracing;

mod app_config;
mod args;
mod model_config;

use app_config::AppConfig;
pub use app_config::get_config_dir;
pub use args::Args;
pub use model_config::{
    ModelOptions,
    QualityThresholds,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten, skip_serializing)]
    pub app_config: AppConfig,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub model: ModelOptions,
    #[serde(default)]
    pub quality: QualityThresholds,
}

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl Config {
    /// Layers the embedded defaults, the optional `config.yaml` of the config
    /// directory and the command line arguments, in that order.
    pub fn new(args: &Args) -> Result<Self, config::ConfigError> {
        let config_dir = args.config_dir.clone().unwrap_or_else(get_config_dir);
        let mut builder = config::Config::builder()
            .set_default("config_dir", config_dir.to_string_lossy().to_string())?;

        builder = builder.add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml));

        let config_files = [("config.yaml", config::FileFormat::Yaml)];

        for (file, format) in &config_files {
            let path = config_dir.join(file);
            debug!(?path, "looking for config file");
            let source = config::File::from(path).format(*format).required(false);
            builder = builder.add_source(source);
        }

        builder = builder.add_source(args.clone());

        let cfg: Self = builder.build()?.try_deserialize()?;

        Ok(cfg)
    }

    pub fn config_dir(&self) -> &Path {
        &self.app_config.config_dir
    }
}
