pub mod coingecko;
pub mod dispatch;
pub mod evaluate;
pub mod lifecycle;
pub mod scheduler;

pub use coingecko::{ApiKeySource, CoinGeckoClient, CoinMarket};
pub use dispatch::Dispatcher;
pub use evaluate::{partition, Partition, PriceQuery};
pub use lifecycle::{AlarmEngine, CycleReport};
pub use scheduler::{Scheduler, SchedulerHandle};
