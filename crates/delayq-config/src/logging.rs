//! Tracing subscriber setup. RUST_LOG takes precedence over the
//! configured level when present.

use std::fs::File;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::models::{LogConfig, LogFormat};
use crate::{ConfigError, ConfigResult};

pub fn init_logging(cfg: &LogConfig) -> ConfigResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .map_err(|e| ConfigError::Configuration(format!("invalid log level '{}': {e}", cfg.level)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match (&cfg.file, cfg.format) {
        (Some(path), LogFormat::Json) => {
            let file = File::create(path)?;
            builder.json().with_writer(Arc::new(file)).try_init()
        }
        (Some(path), LogFormat::Text) => {
            let file = File::create(path)?;
            builder
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init()
        }
        (None, LogFormat::Json) => builder.json().try_init(),
        (None, LogFormat::Text) => builder.try_init(),
    };
    result.map_err(|e| ConfigError::Configuration(format!("failed to init logging: {e}")))
}
