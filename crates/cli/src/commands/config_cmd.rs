//! `mindloop config`: Configuration management.

use mindloop_config::AppConfig;

pub async fn run(init: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");

    if init {
        if config_path.exists() {
            println!("  Config already exists at {}", config_path.display());
            return Ok(());
        }
        std::fs::create_dir_all(AppConfig::config_dir())?;
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("  Wrote default config to {}", config_path.display());
        return Ok(());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# {}", config_path.display());
    if !config_path.exists() {
        println!("# (no file, showing defaults; run `mindloop config --init`)");
    }
    if !config.has_api_key() {
        println!("# no API key set: model calls use the offline provider");
    }
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

/// Drop secrets before printing.
fn redacted(mut config: AppConfig) -> AppConfig {
    config.api_key = None;
    for provider in config.providers.values_mut() {
        provider.api_key = None;
    }
    config
}
