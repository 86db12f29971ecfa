#[cfg(any(
    feature = "adapters",
    feature = "tokio",
    feature = "tungstenite",
    feature = "image"
))]
compile_error!("application must not depend on adapters/framework crates");

pub mod compositor;
pub mod config;
pub mod contracts;
pub mod engine;
pub mod error;
pub mod history;
pub mod infrastructure_config;
pub mod input;
pub mod ports;
pub mod reconcile;
pub mod session;
