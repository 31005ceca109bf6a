mod api_key;
mod config;
mod error;
pub mod http_layers;
pub mod metrics;
mod server;
mod state;

pub use api_key::{Identity, API_KEY_HEADER};
pub use config::ServerConfig;
pub use error::ApiError;
pub use server::{make_app, run_server};
pub use state::ServerState;
