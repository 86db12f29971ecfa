use tracing::info;

use oekaki_application::infrastructure_config::Config;

pub fn print_session_info(config: &Config) {
    info!("Session endpoint: {}", config.session_url());
    info!(
        "Canvas: {}x{} px",
        config.canvas.width, config.canvas.height
    );
    info!("Username: {}", config.client.username);
    info!("Environment: {}", config.environment.env);
}
