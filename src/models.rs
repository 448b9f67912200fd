use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Ceiling on settlement periods in a UK trading day. Short clock-change days
/// run to 46, long ones to 50; period indices outside 1..=50 are malformed.
pub const PERIODS_PER_DAY: u8 = 50;

/// Nominal settlement periods in a year, used as the annualisation basis.
pub const PERIODS_PER_YEAR: f64 = PERIODS_PER_DAY as f64 * 365.0;

/// Length of one settlement period in hours.
pub const PERIOD_HOURS: f64 = 0.5;

/// A fleet battery as listed in the asset register. Created once from the
/// register CSV and never mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// BMU id, the primary identifier across Elexon feeds.
    pub asset_id: String,
    /// Unit id under which the asset clears frequency-response auctions.
    pub dfr_unit_id: Option<String>,
    pub site: String,
    pub owner: String,
    pub optimiser: String,
    pub capacity_mw: f64,
    pub capacity_mwh: f64,
}

/// Lookup over the onboarded fleet, indexed by BMU id and by DFR unit id.
pub struct AssetRegister {
    assets: HashMap<String, Asset>,
    dfr_index: HashMap<String, String>,
}

impl AssetRegister {
    pub fn from_assets(assets: Vec<Asset>) -> Self {
        let mut register = Self {
            assets: HashMap::new(),
            dfr_index: HashMap::new(),
        };
        for asset in assets {
            if let Some(dfr_id) = &asset.dfr_unit_id {
                register
                    .dfr_index
                    .insert(dfr_id.clone(), asset.asset_id.clone());
            }
            register.assets.insert(asset.asset_id.clone(), asset);
        }
        register
    }

    /// Load the register from a CSV with headers
    /// asset_id,dfr_unit_id,site,owner,optimiser,capacity_mw,capacity_mwh.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening asset register {}", path.display()))?;
        let mut assets = Vec::new();
        for row in reader.deserialize() {
            let asset: Asset =
                row.with_context(|| format!("reading asset register {}", path.display()))?;
            assets.push(asset);
        }
        Ok(Self::from_assets(assets))
    }

    pub fn get(&self, asset_id: &str) -> Option<&Asset> {
        self.assets.get(asset_id)
    }

    pub fn by_dfr_unit(&self, unit: &str) -> Option<&Asset> {
        self.dfr_index
            .get(unit)
            .and_then(|asset_id| self.assets.get(asset_id))
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.assets.contains_key(asset_id)
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// One fixed 30-minute UK settlement interval.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SettlementPeriod {
    pub date: NaiveDate,
    pub period: u8,
}

impl SettlementPeriod {
    /// Returns None when the period index falls outside 1..=50.
    pub fn new(date: NaiveDate, period: u8) -> Option<Self> {
        if (1..=PERIODS_PER_DAY).contains(&period) {
            Some(Self { date, period })
        } else {
            None
        }
    }
}

impl fmt::Display for SettlementPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} P{}", self.date, self.period)
    }
}

/// The three revenue streams. Closed by regulatory definition; pricing rules
/// dispatch on this enum rather than open-ended branching.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Stream {
    Wholesale,
    BalancingMechanism,
    FrequencyResponse,
}

impl Stream {
    pub const ALL: [Stream; 3] = [
        Stream::Wholesale,
        Stream::BalancingMechanism,
        Stream::FrequencyResponse,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Stream::Wholesale => "Wholesale",
            Stream::BalancingMechanism => "BM",
            Stream::FrequencyResponse => "DFR",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A normalized observation for one asset, period and stream. Volume is MWh
/// for Wholesale and BM, contracted MW for FrequencyResponse (whose price is
/// pre-pro-rated to £/MW per period, so revenue = volume × price everywhere).
/// Price is None when the feed carried volume but no matching price.
#[derive(Debug, Clone, Serialize)]
pub struct MarketRecord {
    pub asset_id: String,
    pub period: SettlementPeriod,
    pub stream: Stream,
    pub volume: f64,
    pub price: Option<f64>,
}

/// Revenue earned by one asset in one period under one stream.
#[derive(Debug, Clone, Serialize)]
pub struct RevenueEntry {
    pub asset_id: String,
    pub period: SettlementPeriod,
    pub stream: Stream,
    pub revenue_gbp: f64,
}

/// One leaderboard row: daily revenue per stream plus annualised £/MW/yr.
/// Recomputed on demand from MarketRecords; never the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyLeaderboardRow {
    pub asset_id: String,
    pub date: NaiveDate,
    pub wholesale_gbp: f64,
    pub balancing_gbp: f64,
    pub frequency_gbp: f64,
    pub total_gbp: f64,
    pub wholesale_gbp_per_mw_year: f64,
    pub balancing_gbp_per_mw_year: f64,
    pub frequency_gbp_per_mw_year: f64,
    pub total_gbp_per_mw_year: f64,
    /// Distinct settlement periods that produced revenue entries for the day.
    pub periods_represented: u32,
}

impl DailyLeaderboardRow {
    pub fn stream_revenue(&self, stream: Stream) -> f64 {
        match stream {
            Stream::Wholesale => self.wholesale_gbp,
            Stream::BalancingMechanism => self.balancing_gbp,
            Stream::FrequencyResponse => self.frequency_gbp,
        }
    }
}

/// Inclusive reporting window, the only externally tunable core parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            anyhow::bail!("date range end {} precedes start {}", end, start);
        }
        Ok(Self { start, end })
    }

    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Round a monetary amount to whole pence.
pub fn round_to_pence(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_settlement_period_bounds() {
        let d = date("2024-03-31");
        assert!(SettlementPeriod::new(d, 0).is_none());
        assert!(SettlementPeriod::new(d, 1).is_some());
        assert!(SettlementPeriod::new(d, 50).is_some());
        assert!(SettlementPeriod::new(d, 51).is_none());
    }

    #[test]
    fn test_date_range_iteration() {
        let range = DateRange::new(date("2024-01-30"), date("2024-02-02")).unwrap();
        let days: Vec<_> = range.days().collect();
        assert_eq!(days.len(), 4);
        assert_eq!(days[0], date("2024-01-30"));
        assert_eq!(days[3], date("2024-02-02"));
        assert_eq!(range.num_days(), 4);

        assert!(DateRange::new(date("2024-02-02"), date("2024-01-30")).is_err());
    }

    #[test]
    fn test_register_indexes_both_ids() {
        let register = AssetRegister::from_assets(vec![Asset {
            asset_id: "T_BATT-1".into(),
            dfr_unit_id: Some("BATT1_DFR".into()),
            site: "Somerset".into(),
            owner: "Acme".into(),
            optimiser: "Acme Trading".into(),
            capacity_mw: 50.0,
            capacity_mwh: 100.0,
        }]);

        assert!(register.contains("T_BATT-1"));
        assert!(!register.contains("T_OTHER-1"));
        let by_dfr = register.by_dfr_unit("BATT1_DFR").unwrap();
        assert_eq!(by_dfr.asset_id, "T_BATT-1");
        assert!(register.by_dfr_unit("UNKNOWN").is_none());
    }

    #[test]
    fn test_register_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "asset_id,dfr_unit_id,site,owner,optimiser,capacity_mw,capacity_mwh"
        )
        .unwrap();
        writeln!(file, "T_BATT-1,BATT1_DFR,Somerset,Acme,Acme Trading,50,100").unwrap();
        writeln!(file, "T_BATT-2,,Kent,Volta,Volta,25,50").unwrap();
        file.flush().unwrap();

        let register = AssetRegister::from_csv(file.path()).unwrap();
        assert_eq!(register.len(), 2);
        assert_eq!(register.get("T_BATT-1").unwrap().capacity_mw, 50.0);
        // empty dfr_unit_id column deserializes to None
        assert!(register.get("T_BATT-2").unwrap().dfr_unit_id.is_none());
    }

    #[test]
    fn test_round_to_pence() {
        assert_eq!(round_to_pence(146000.0), 146000.0);
        assert_eq!(round_to_pence(12.3456), 12.35);
        assert_eq!(round_to_pence(-12.3456), -12.35);
    }
}
