use crate::aggregator::LeaderboardAggregator;
use crate::attributor::RevenueAttributor;
use crate::errors::{MalformedRecordError, MissingPriceError, UpstreamUnavailableError};
use crate::feed::MarketDataSource;
use crate::models::{AssetRegister, DailyLeaderboardRow, DateRange};
use crate::normalizer::{MarketDataNormalizer, RawBatch};
use chrono::NaiveDate;
use log::{info, warn};
use rayon::prelude::*;

/// Everything one leaderboard refresh produced: the ranked rows plus the
/// diagnostics for whatever was skipped or unreachable along the way.
#[derive(Debug)]
pub struct LeaderboardReport {
    pub range: DateRange,
    pub rows: Vec<DailyLeaderboardRow>,
    pub rejected_records: Vec<MalformedRecordError>,
    pub missing_prices: Vec<MissingPriceError>,
    pub failed_fetches: Vec<UpstreamUnavailableError>,
}

#[derive(Clone, Copy)]
enum FeedKind {
    Pn,
    Mid,
    Acceptance,
    Dfr,
}

const FEED_KINDS: [FeedKind; 4] = [
    FeedKind::Pn,
    FeedKind::Mid,
    FeedKind::Acceptance,
    FeedKind::Dfr,
];

enum FeedSlice {
    Pn(Vec<crate::feed::PnRecord>),
    Mid(Vec<crate::feed::MidRecord>),
    Acceptance(Vec<crate::feed::AcceptanceRecord>),
    Dfr(Vec<crate::feed::DfrRecord>),
}

/// The whole pipeline for one reporting window: fetch feeds (parallel per
/// feed/day), then normalize, attribute and aggregate sequentially. Pure in
/// (range, source contents); holds no mutable state between runs.
pub struct LeaderboardPipeline<'a, S: MarketDataSource> {
    source: &'a S,
    register: &'a AssetRegister,
}

impl<'a, S: MarketDataSource> LeaderboardPipeline<'a, S> {
    pub fn new(source: &'a S, register: &'a AssetRegister) -> Self {
        Self { source, register }
    }

    pub fn run(&self, range: DateRange) -> LeaderboardReport {
        info!(
            "computing leaderboard for {}..={} ({} assets)",
            range.start,
            range.end,
            self.register.len()
        );

        let (raw, failed_fetches) = self.fetch(range);

        let normalizer = MarketDataNormalizer::new(self.register);
        let batch = normalizer.normalize(&raw);

        let outcome = RevenueAttributor::attribute(&batch.records);

        let aggregator = LeaderboardAggregator::new(self.register);
        let rows = aggregator.aggregate(&outcome.entries);

        for failure in &failed_fetches {
            warn!("{}", failure);
        }
        info!("leaderboard computed: {} rows", rows.len());

        LeaderboardReport {
            range,
            rows,
            rejected_records: batch.rejects,
            missing_prices: outcome.missing_prices,
            failed_fetches,
        }
    }

    /// Feed fetches are independent per (feed, day), so they fan out across
    /// the rayon pool. A failed fetch drops only its own slice.
    fn fetch(&self, range: DateRange) -> (RawBatch, Vec<UpstreamUnavailableError>) {
        let tasks: Vec<(FeedKind, NaiveDate)> = range
            .days()
            .flat_map(|date| FEED_KINDS.iter().map(move |kind| (*kind, date)))
            .collect();

        let results: Vec<Result<FeedSlice, UpstreamUnavailableError>> = tasks
            .par_iter()
            .map(|(kind, date)| match kind {
                FeedKind::Pn => self.source.physical_notifications(*date).map(FeedSlice::Pn),
                FeedKind::Mid => self.source.market_index_prices(*date).map(FeedSlice::Mid),
                FeedKind::Acceptance => self.source.bm_acceptances(*date).map(FeedSlice::Acceptance),
                FeedKind::Dfr => self.source.dfr_auction_results(*date).map(FeedSlice::Dfr),
            })
            .collect();

        let mut raw = RawBatch::default();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(FeedSlice::Pn(records)) => raw.pns.extend(records),
                Ok(FeedSlice::Mid(records)) => raw.mids.extend(records),
                Ok(FeedSlice::Acceptance(records)) => raw.acceptances.extend(records),
                Ok(FeedSlice::Dfr(records)) => raw.dfr_results.extend(records),
                Err(failure) => failures.push(failure),
            }
        }
        (raw, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{AcceptanceRecord, DfrRecord, FixtureSource, MidRecord, PnRecord};
    use crate::models::{Asset, Stream};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn register() -> AssetRegister {
        AssetRegister::from_assets(vec![Asset {
            asset_id: "T_BATT-1".into(),
            dfr_unit_id: Some("BATT1_DFR".into()),
            site: "Somerset".into(),
            owner: "Acme".into(),
            optimiser: "Acme Trading".into(),
            capacity_mw: 50.0,
            capacity_mwh: 100.0,
        }])
    }

    fn fixture() -> FixtureSource {
        let mut source = FixtureSource::new();
        let day = date("2024-06-01");

        // one flat 20 MW PN for period 1: 10 MWh at £40 -> £400 wholesale
        source.push_pn(PnRecord {
            bm_unit: "T_BATT-1".into(),
            settlement_date: day,
            settlement_period: 1,
            time_from: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            time_to: Utc.with_ymd_and_hms(2024, 6, 1, 0, 30, 0).unwrap(),
            level_from: 20.0,
            level_to: 20.0,
        });
        source.push_mid(MidRecord {
            data_provider: "N2EXMIDP".into(),
            settlement_date: day,
            settlement_period: 1,
            price: 40.0,
            volume: 250.0,
        });
        // one accepted offer: 5 MWh at £80 -> £400 BM
        source.push_acceptance(AcceptanceRecord {
            bm_unit: "T_BATT-1".into(),
            settlement_date: day,
            settlement_period: 20,
            accepted_volume: 5.0,
            accepted_price: 80.0,
            so_flag: false,
        });
        // one DFR block: 50 MW at £4/MW/h over 8 periods -> £800 DFR
        source.push_dfr(DfrRecord {
            unit_name: "BATT1_DFR".into(),
            efa_date: day,
            efa_block: 1,
            service: "DCL".into(),
            cleared_volume_mw: 50.0,
            clearing_price: 4.0,
            cancelled: false,
        });
        source
    }

    #[test]
    fn test_end_to_end_single_day() {
        let register = register();
        let source = fixture();
        let pipeline = LeaderboardPipeline::new(&source, &register);

        let report = pipeline.run(DateRange::single_day(date("2024-06-01")));
        assert!(report.failed_fetches.is_empty());
        assert!(report.rejected_records.is_empty());
        assert!(report.missing_prices.is_empty());

        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.asset_id, "T_BATT-1");
        assert_eq!(row.wholesale_gbp, 400.0);
        assert_eq!(row.balancing_gbp, 400.0);
        assert_eq!(row.frequency_gbp, 800.0);
        assert_eq!(row.total_gbp, 1600.0);
        // periods: 1 (wholesale), 20 (BM), 1..=8 (DFR) -> 9 distinct
        assert_eq!(row.periods_represented, 9);
    }

    #[test]
    fn test_failed_feed_surfaces_without_halting_others() {
        let register = register();
        let mut source = fixture();
        source.fail(Stream::BalancingMechanism, date("2024-06-01"));
        let pipeline = LeaderboardPipeline::new(&source, &register);

        let report = pipeline.run(DateRange::single_day(date("2024-06-01")));
        assert_eq!(report.failed_fetches.len(), 1);
        assert_eq!(report.failed_fetches[0].stream, Stream::BalancingMechanism);

        // wholesale and DFR are unaffected; only the BM slice is absent
        let row = &report.rows[0];
        assert_eq!(row.wholesale_gbp, 400.0);
        assert_eq!(row.balancing_gbp, 0.0);
        assert_eq!(row.frequency_gbp, 800.0);
    }

    #[test]
    fn test_recomputation_idempotent_end_to_end() {
        let register = register();
        let source = fixture();
        let pipeline = LeaderboardPipeline::new(&source, &register);
        let range = DateRange::single_day(date("2024-06-01"));

        let first = serde_json::to_string(&pipeline.run(range).rows).unwrap();
        let second = serde_json::to_string(&pipeline.run(range).rows).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_multi_day_range_produces_row_per_day() {
        let register = register();
        let mut source = fixture();
        // second day with wholesale only
        source.push_pn(PnRecord {
            bm_unit: "T_BATT-1".into(),
            settlement_date: date("2024-06-02"),
            settlement_period: 1,
            time_from: Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap(),
            time_to: Utc.with_ymd_and_hms(2024, 6, 2, 0, 30, 0).unwrap(),
            level_from: 10.0,
            level_to: 10.0,
        });
        source.push_mid(MidRecord {
            data_provider: "N2EXMIDP".into(),
            settlement_date: date("2024-06-02"),
            settlement_period: 1,
            price: 50.0,
            volume: 100.0,
        });

        let pipeline = LeaderboardPipeline::new(&source, &register);
        let range = DateRange::new(date("2024-06-01"), date("2024-06-02")).unwrap();
        let report = pipeline.run(range);

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].date, date("2024-06-01"));
        assert_eq!(report.rows[1].date, date("2024-06-02"));
        assert_eq!(report.rows[1].wholesale_gbp, 250.0);
    }
}
