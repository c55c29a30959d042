/*!
# Contact Relay

A contact form whose submissions end up as rows in a spreadsheet.

## Overview

Submissions are captured by a form, checked locally, and relayed to a
spreadsheet-append endpoint (the *destination*, normally a hosted Apps Script
web app). Browsers cannot read that endpoint's responses cross-origin, so an
optional proxy relay server forwards submissions on the form's behalf and
hands back a uniform result.

## Architecture

### Form (client)
- **Terminal form** - prompts for the fields, validates as you type
- **Settings** - destination URL, proxy URL and proxy switch, persisted to a
  small JSON file and re-read before every submission
- **Relay** - ordered fallback chain: proxy, direct, fire-and-forget, hidden form

### Proxy relay server
- **Technologies**: Rust, axum, reqwest
- Validates, stamps the submission with user agent and address, forwards it to
  the destination with a 30 second bound, normalises the answer

### Destination
- Appends one eight-column row per submission, writing the header row first
- A local in-memory version ships as the `destination` binary

## Modules

- **submission**: Submission record and validation
- **error**: Error types and the JSON error envelope
- **config**: Proxy server configuration from the environment
- **settings**: Client settings and their file-backed store
- **sheet**: Spreadsheet-append handler
- **forward**: Proxy-to-destination forwarding and connectivity tests
- **relay**: Client fallback chain
- **app**: Proxy routes and server

## REST API Endpoints

- `GET /health` - Liveness and environment
- `POST /api/submit` - JSON submission, optional `scriptUrl` override
- `POST /api/submit-form` - Form-encoded submission
- `POST /api/test-connection` - Probe a candidate destination URL
*/

pub mod config;
pub mod error;
pub mod forward;
pub mod relay;
pub mod settings;
pub mod sheet;
pub mod submission;

#[cfg(feature = "web")]
pub mod app;

/// Re-export the types most callers need
pub use config::{Config, Environment};
pub use error::{ForwardError, RelayError, SettingsError, ValidationError};
pub use forward::{ConnectionReport, Forwarder};
pub use relay::{Confirmation, Delivery, Relay, Transport};
pub use settings::{RelaySettings, SettingsStore};
pub use sheet::Sheet;
pub use submission::Submission;

/// Install the `env_logger` backend, defaulting to `info` unless `RUST_LOG` says otherwise
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
