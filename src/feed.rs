use crate::errors::UpstreamUnavailableError;
use crate::models::Stream;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::RwLock;

/// Physical notification slice for one BMU: a level ramp over part of a
/// settlement period (Elexon PN stream shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnRecord {
    pub bm_unit: String,
    pub settlement_date: NaiveDate,
    pub settlement_period: u16,
    pub time_from: DateTime<Utc>,
    pub time_to: DateTime<Utc>,
    pub level_from: f64,
    pub level_to: f64,
}

/// Market index price for one period from one provider (N2EX or APX).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidRecord {
    pub data_provider: String,
    pub settlement_date: NaiveDate,
    pub settlement_period: u16,
    /// £/MWh.
    pub price: f64,
    /// Traded volume backing the price, the weight for the cross-provider average.
    pub volume: f64,
}

/// An accepted bid/offer for one BMU and period. Volume is signed MWh:
/// offers positive, bids negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceRecord {
    pub bm_unit: String,
    pub settlement_date: NaiveDate,
    pub settlement_period: u16,
    pub accepted_volume: f64,
    /// £/MWh at the accepted level.
    pub accepted_price: f64,
    #[serde(default)]
    pub so_flag: bool,
}

/// Frequency-response auction result for one unit and 4-hour EFA block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DfrRecord {
    pub unit_name: String,
    pub efa_date: NaiveDate,
    /// EFA block 1..=6, each covering eight settlement periods.
    pub efa_block: u8,
    pub service: String,
    pub cleared_volume_mw: f64,
    /// £/MW/h clearing price for the block.
    pub clearing_price: f64,
    #[serde(default)]
    pub cancelled: bool,
}

/// Injectable data access over the four raw feeds. One method per feed keeps
/// the stream set closed; implementations decide where payloads come from.
pub trait MarketDataSource: Sync {
    fn physical_notifications(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<PnRecord>, UpstreamUnavailableError>;

    fn market_index_prices(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<MidRecord>, UpstreamUnavailableError>;

    fn bm_acceptances(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<AcceptanceRecord>, UpstreamUnavailableError>;

    fn dfr_auction_results(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<DfrRecord>, UpstreamUnavailableError>;
}

/// Loads feed payloads from local JSON files, one array per feed per day.
/// Patterns substitute `{date}` with the ISO date, e.g.
/// `feeds/pn_{date}.json`.
pub struct FileSource {
    pub pn_pattern: String,
    pub mid_pattern: String,
    pub acceptance_pattern: String,
    pub dfr_pattern: String,
}

fn load_json<T: DeserializeOwned>(
    pattern: &str,
    stream: Stream,
    date: NaiveDate,
) -> Result<Vec<T>, UpstreamUnavailableError> {
    let path = pattern.replace("{date}", &date.format("%Y-%m-%d").to_string());
    let text = fs::read_to_string(&path).map_err(|e| UpstreamUnavailableError {
        stream,
        date,
        reason: format!("{}: {}", path, e),
    })?;
    serde_json::from_str(&text).map_err(|e| UpstreamUnavailableError {
        stream,
        date,
        reason: format!("{}: {}", path, e),
    })
}

impl MarketDataSource for FileSource {
    fn physical_notifications(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<PnRecord>, UpstreamUnavailableError> {
        load_json(&self.pn_pattern, Stream::Wholesale, date)
    }

    fn market_index_prices(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<MidRecord>, UpstreamUnavailableError> {
        load_json(&self.mid_pattern, Stream::Wholesale, date)
    }

    fn bm_acceptances(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<AcceptanceRecord>, UpstreamUnavailableError> {
        load_json(&self.acceptance_pattern, Stream::BalancingMechanism, date)
    }

    fn dfr_auction_results(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<DfrRecord>, UpstreamUnavailableError> {
        load_json(&self.dfr_pattern, Stream::FrequencyResponse, date)
    }
}

/// Read-through cache over another source. Successful payloads are kept per
/// day; failures are not cached so a later refresh can succeed.
pub struct CachedSource<S> {
    inner: S,
    pns: RwLock<HashMap<NaiveDate, Vec<PnRecord>>>,
    mids: RwLock<HashMap<NaiveDate, Vec<MidRecord>>>,
    acceptances: RwLock<HashMap<NaiveDate, Vec<AcceptanceRecord>>>,
    dfr_results: RwLock<HashMap<NaiveDate, Vec<DfrRecord>>>,
}

impl<S> CachedSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pns: RwLock::new(HashMap::new()),
            mids: RwLock::new(HashMap::new()),
            acceptances: RwLock::new(HashMap::new()),
            dfr_results: RwLock::new(HashMap::new()),
        }
    }
}

fn read_through<T: Clone>(
    cache: &RwLock<HashMap<NaiveDate, Vec<T>>>,
    date: NaiveDate,
    fetch: impl FnOnce() -> Result<Vec<T>, UpstreamUnavailableError>,
) -> Result<Vec<T>, UpstreamUnavailableError> {
    if let Ok(map) = cache.read() {
        if let Some(hit) = map.get(&date) {
            return Ok(hit.clone());
        }
    }
    let fresh = fetch()?;
    if let Ok(mut map) = cache.write() {
        map.insert(date, fresh.clone());
    }
    Ok(fresh)
}

impl<S: MarketDataSource> MarketDataSource for CachedSource<S> {
    fn physical_notifications(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<PnRecord>, UpstreamUnavailableError> {
        read_through(&self.pns, date, || self.inner.physical_notifications(date))
    }

    fn market_index_prices(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<MidRecord>, UpstreamUnavailableError> {
        read_through(&self.mids, date, || self.inner.market_index_prices(date))
    }

    fn bm_acceptances(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<AcceptanceRecord>, UpstreamUnavailableError> {
        read_through(&self.acceptances, date, || self.inner.bm_acceptances(date))
    }

    fn dfr_auction_results(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<DfrRecord>, UpstreamUnavailableError> {
        read_through(&self.dfr_results, date, || {
            self.inner.dfr_auction_results(date)
        })
    }
}

/// In-memory source for deterministic tests and demos. Days with no pushed
/// records yield empty payloads; `fail` marks a (stream, date) as down.
#[derive(Default)]
pub struct FixtureSource {
    pns: HashMap<NaiveDate, Vec<PnRecord>>,
    mids: HashMap<NaiveDate, Vec<MidRecord>>,
    acceptances: HashMap<NaiveDate, Vec<AcceptanceRecord>>,
    dfr_results: HashMap<NaiveDate, Vec<DfrRecord>>,
    failures: HashSet<(Stream, NaiveDate)>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pn(&mut self, record: PnRecord) {
        self.pns
            .entry(record.settlement_date)
            .or_default()
            .push(record);
    }

    pub fn push_mid(&mut self, record: MidRecord) {
        self.mids
            .entry(record.settlement_date)
            .or_default()
            .push(record);
    }

    pub fn push_acceptance(&mut self, record: AcceptanceRecord) {
        self.acceptances
            .entry(record.settlement_date)
            .or_default()
            .push(record);
    }

    pub fn push_dfr(&mut self, record: DfrRecord) {
        self.dfr_results
            .entry(record.efa_date)
            .or_default()
            .push(record);
    }

    pub fn fail(&mut self, stream: Stream, date: NaiveDate) {
        self.failures.insert((stream, date));
    }

    fn check(&self, stream: Stream, date: NaiveDate) -> Result<(), UpstreamUnavailableError> {
        if self.failures.contains(&(stream, date)) {
            Err(UpstreamUnavailableError {
                stream,
                date,
                reason: "fixture marked unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl MarketDataSource for FixtureSource {
    fn physical_notifications(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<PnRecord>, UpstreamUnavailableError> {
        self.check(Stream::Wholesale, date)?;
        Ok(self.pns.get(&date).cloned().unwrap_or_default())
    }

    fn market_index_prices(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<MidRecord>, UpstreamUnavailableError> {
        self.check(Stream::Wholesale, date)?;
        Ok(self.mids.get(&date).cloned().unwrap_or_default())
    }

    fn bm_acceptances(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<AcceptanceRecord>, UpstreamUnavailableError> {
        self.check(Stream::BalancingMechanism, date)?;
        Ok(self.acceptances.get(&date).cloned().unwrap_or_default())
    }

    fn dfr_auction_results(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<DfrRecord>, UpstreamUnavailableError> {
        self.check(Stream::FrequencyResponse, date)?;
        Ok(self.dfr_results.get(&date).cloned().unwrap_or_default())
    }
}
