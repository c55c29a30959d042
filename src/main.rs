#![cfg(not(tarpaulin_include))]

use contact_relay::{Config, app, init_logging};

/// Main entry point for the proxy relay server
///
/// Reads its configuration from the environment (and `.env`), then serves
/// until interrupted.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::load();
    app::run(config).await
}
