use std::path::Path;

use anyhow::Error;

use crate::booru::config::AppConfig;
use crate::program::Program;

mod booru;
mod logging;
mod program;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config_path = Path::new(CONFIG_PATH);
    let config = AppConfig::load_or_default(config_path)?;
    if !config_path.exists() {
        // First run: leave an editable config behind.
        AppConfig::write_default(config_path)?;
    }

    let _log_guard = logging::init(&config.logging)?;

    Program::new(config).run().await
}
