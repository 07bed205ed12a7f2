pub mod rest;

pub use rest::{ApiKeySource, CoinGeckoClient, CoinMarket};
