pub mod config;
pub mod error;
pub mod notify;
pub mod price;
pub mod store;
pub mod types;

pub use config::{Config, MailSettings, REDACTED_PASSWORD};
pub use error::{Error, Result};
pub use notify::NotificationSink;
pub use price::{PriceSource, PriceTable};
pub use store::{AlarmStore, KeyValueStore};
pub use types::*;
