pub mod client;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod utils;

// Re-export
pub use client::create_http_client;
pub use config::{ApiCredentials, ExchangeConfig, load_dotenv};
pub use errors::{Result, WiredExchangeError};
pub use exchange::{ExchangeTrait, RequestSigner};
pub use utils::{get_timestamp_millis, parse_decimal, parse_i64, split_symbol};
