pub mod aggregator;
pub mod attributor;
pub mod errors;
pub mod feed;
pub mod models;
pub mod normalizer;
pub mod pipeline;

pub use aggregator::LeaderboardAggregator;
pub use attributor::{AttributionOutcome, RevenueAttributor};
pub use errors::{MalformedRecordError, MissingPriceError, UpstreamUnavailableError};
pub use feed::{CachedSource, FileSource, FixtureSource, MarketDataSource};
pub use models::{
    Asset, AssetRegister, DailyLeaderboardRow, DateRange, MarketRecord, RevenueEntry,
    SettlementPeriod, Stream,
};
pub use normalizer::{MarketDataNormalizer, NormalizedBatch, RawBatch};
pub use pipeline::{LeaderboardPipeline, LeaderboardReport};
