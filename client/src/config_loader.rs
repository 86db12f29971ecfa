use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use std::fs;
use std::path::Path;
use tracing::info;

use oekaki_application::error::{AppError, AppResult};
use oekaki_application::infrastructure_config::Config;

pub fn load_config() -> AppResult<Config> {
    generate_env_template_if_missing()?;

    let default_config = Config::default();
    let mut figment = Figment::from(Serialized::defaults(default_config));

    if Path::new("config.toml").exists() {
        figment = figment.merge(Toml::file("config.toml"));
    }

    if Path::new("config.json").exists() {
        figment = figment.merge(Json::file("config.json"));
    }

    let config: Config = figment
        .merge(Env::prefixed("OEKAKI_").split("__"))
        .extract()
        .map_err(|e| AppError::Config {
            message: format!("Failed to load configuration: {e}"),
        })?;

    config.validate()?;
    Ok(config)
}

fn generate_env_template_if_missing() -> AppResult<()> {
    let template_path = ".env.example";
    if Path::new(".env").exists() || Path::new(template_path).exists() {
        return Ok(());
    }

    let template = "\
# Oekaki client configuration. Copy to .env and adjust.
# Nested keys use double underscores, e.g. OEKAKI_SESSION__WS_BASE_URL.
OEKAKI_SESSION__WS_BASE_URL=ws://localhost:8080
OEKAKI_SESSION__SESSION_ID=local
OEKAKI_CANVAS__WIDTH=800
OEKAKI_CANVAS__HEIGHT=600
OEKAKI_CLIENT__USERNAME=anonymous
OEKAKI_LOGGING__LEVEL=info
OEKAKI_LOGGING__FORMAT=pretty
";
    fs::write(template_path, template)?;
    info!("generated {template_path}");
    Ok(())
}
