#![cfg(not(tarpaulin_include))]

use std::env;
use std::path::PathBuf;

use contact_relay::{init_logging, sheet};
use log::info;
use tokio::net::TcpListener;

/// Local stand-in for the hosted spreadsheet-append script
///
/// Usage: `destination [port]`, or set `DESTINATION_PORT`. Set `SHEET_CSV` to
/// mirror the sheet into a CSV file after every append.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let _ = dotenvy::dotenv();

    let args: Vec<String> = env::args().collect();

    let mut port: u16 = env::var("DESTINATION_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    if args.len() >= 2 {
        port = args[1].parse().unwrap_or(port);
    }

    let csv_path = env::var("SHEET_CSV").ok().map(PathBuf::from);
    if let Some(path) = &csv_path {
        info!("Mirroring sheet to {}", path.display());
    }

    let app = sheet::router(sheet::SheetState::new(csv_path));

    let address = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&address).await?;
    info!("Destination listening on http://{address}/exec");
    axum::serve(listener, app).await?;

    Ok(())
}
