use crate::models::{
    round_to_pence, AssetRegister, DailyLeaderboardRow, RevenueEntry, SettlementPeriod, Stream,
    PERIODS_PER_YEAR,
};
use chrono::NaiveDate;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct DayAccumulator {
    stream_gbp: [f64; 3],
    periods: BTreeSet<SettlementPeriod>,
}

fn stream_slot(stream: Stream) -> usize {
    match stream {
        Stream::Wholesale => 0,
        Stream::BalancingMechanism => 1,
        Stream::FrequencyResponse => 2,
    }
}

/// Rolls RevenueEntries up to daily per-asset rows and annualises them to
/// £/MW/yr. Grouping is BTreeMap-keyed, so recomputation from the same entry
/// set is byte-identical.
pub struct LeaderboardAggregator<'a> {
    register: &'a AssetRegister,
}

impl<'a> LeaderboardAggregator<'a> {
    pub fn new(register: &'a AssetRegister) -> Self {
        Self { register }
    }

    pub fn aggregate(&self, entries: &[RevenueEntry]) -> Vec<DailyLeaderboardRow> {
        let mut days: BTreeMap<(String, NaiveDate), DayAccumulator> = BTreeMap::new();
        for entry in entries {
            let accumulator = days
                .entry((entry.asset_id.clone(), entry.period.date))
                .or_default();
            accumulator.stream_gbp[stream_slot(entry.stream)] += entry.revenue_gbp;
            accumulator.periods.insert(entry.period);
        }

        let mut rows = Vec::with_capacity(days.len());
        for ((asset_id, date), accumulator) in days {
            let capacity_mw = match self.register.get(&asset_id) {
                Some(asset) => asset.capacity_mw,
                None => {
                    // entries only ever reference registered assets
                    warn!("dropping revenue for unregistered asset {}", asset_id);
                    continue;
                }
            };

            let periods_represented = accumulator.periods.len() as u32;
            let annualise = |revenue: f64| {
                if capacity_mw > 0.0 && periods_represented > 0 {
                    round_to_pence(
                        revenue * PERIODS_PER_YEAR / periods_represented as f64 / capacity_mw,
                    )
                } else {
                    0.0
                }
            };

            let [wholesale, balancing, frequency] = accumulator.stream_gbp;
            let total = wholesale + balancing + frequency;
            rows.push(DailyLeaderboardRow {
                asset_id,
                date,
                wholesale_gbp: round_to_pence(wholesale),
                balancing_gbp: round_to_pence(balancing),
                frequency_gbp: round_to_pence(frequency),
                total_gbp: round_to_pence(total),
                wholesale_gbp_per_mw_year: annualise(wholesale),
                balancing_gbp_per_mw_year: annualise(balancing),
                frequency_gbp_per_mw_year: annualise(frequency),
                total_gbp_per_mw_year: annualise(total),
                periods_represented,
            });
        }

        Self::rank(&mut rows);
        rows
    }

    /// Leaderboard order: per date, annualised total descending with ties
    /// broken by asset id, so equal-revenue assets rank identically every run.
    fn rank(rows: &mut [DailyLeaderboardRow]) {
        rows.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| {
                    b.total_gbp_per_mw_year
                        .partial_cmp(&a.total_gbp_per_mw_year)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.asset_id.cmp(&b.asset_id))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Asset;

    fn register() -> AssetRegister {
        let asset = |id: &str, capacity: f64| Asset {
            asset_id: id.into(),
            dfr_unit_id: None,
            site: "Somerset".into(),
            owner: "Acme".into(),
            optimiser: "Acme Trading".into(),
            capacity_mw: capacity,
            capacity_mwh: capacity * 2.0,
        };
        AssetRegister::from_assets(vec![
            asset("A1", 50.0),
            asset("B2", 50.0),
            asset("C3", 50.0),
        ])
    }

    fn entry(asset: &str, day: &str, index: u8, stream: Stream, revenue: f64) -> RevenueEntry {
        RevenueEntry {
            asset_id: asset.into(),
            period: SettlementPeriod::new(
                NaiveDate::parse_from_str(day, "%Y-%m-%d").unwrap(),
                index,
            )
            .unwrap(),
            stream,
            revenue_gbp: revenue,
        }
    }

    #[test]
    fn test_worked_example_annualisation() {
        // 10 MWh at £40/MWh in one period on a 50 MW asset:
        // £400 daily, £400 * 18250 / 1 / 50 = £146,000/MW/yr
        let register = register();
        let aggregator = LeaderboardAggregator::new(&register);
        let rows = aggregator.aggregate(&[entry("A1", "2024-06-01", 1, Stream::Wholesale, 400.0)]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].wholesale_gbp, 400.0);
        assert_eq!(rows[0].total_gbp, 400.0);
        assert_eq!(rows[0].periods_represented, 1);
        assert_eq!(rows[0].total_gbp_per_mw_year, 146_000.0);
    }

    #[test]
    fn test_annualised_figure_scales_linearly() {
        let register = register();
        let aggregator = LeaderboardAggregator::new(&register);

        let single = aggregator.aggregate(&[entry("A1", "2024-06-01", 1, Stream::Wholesale, 400.0)]);
        let double = aggregator.aggregate(&[entry("A1", "2024-06-01", 1, Stream::Wholesale, 800.0)]);
        assert_eq!(
            double[0].total_gbp_per_mw_year,
            2.0 * single[0].total_gbp_per_mw_year
        );
    }

    #[test]
    fn test_streams_kept_separate_and_summed() {
        let register = register();
        let aggregator = LeaderboardAggregator::new(&register);
        let rows = aggregator.aggregate(&[
            entry("A1", "2024-06-01", 1, Stream::Wholesale, 400.0),
            entry("A1", "2024-06-01", 1, Stream::BalancingMechanism, -50.0),
            entry("A1", "2024-06-01", 2, Stream::FrequencyResponse, 100.0),
        ]);

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.wholesale_gbp, 400.0);
        assert_eq!(row.balancing_gbp, -50.0);
        assert_eq!(row.frequency_gbp, 100.0);
        assert_eq!(row.total_gbp, 450.0);
        assert_eq!(row.periods_represented, 2);
    }

    #[test]
    fn test_excluded_period_changes_annualisation_versus_zero_fill() {
        let register = register();
        let aggregator = LeaderboardAggregator::new(&register);

        // a missing-price period produces no entry at all
        let excluded = aggregator.aggregate(&[entry("A1", "2024-06-01", 1, Stream::Wholesale, 400.0)]);
        // a zero-filled computation would still count the gap period
        let zero_filled = aggregator.aggregate(&[
            entry("A1", "2024-06-01", 1, Stream::Wholesale, 400.0),
            entry("A1", "2024-06-01", 2, Stream::Wholesale, 0.0),
        ]);

        assert_eq!(excluded[0].total_gbp, zero_filled[0].total_gbp);
        assert_ne!(
            excluded[0].total_gbp_per_mw_year,
            zero_filled[0].total_gbp_per_mw_year
        );
    }

    #[test]
    fn test_recomputation_is_byte_identical() {
        let register = register();
        let aggregator = LeaderboardAggregator::new(&register);
        let entries = vec![
            entry("B2", "2024-06-01", 3, Stream::BalancingMechanism, 123.456),
            entry("A1", "2024-06-01", 1, Stream::Wholesale, 400.0),
            entry("A1", "2024-06-02", 1, Stream::FrequencyResponse, 9.99),
        ];

        let first = serde_json::to_string(&aggregator.aggregate(&entries)).unwrap();
        let second = serde_json::to_string(&aggregator.aggregate(&entries)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_equal_revenue_ties_break_by_asset_id() {
        let register = register();
        let aggregator = LeaderboardAggregator::new(&register);
        let entries = vec![
            entry("C3", "2024-06-01", 1, Stream::Wholesale, 400.0),
            entry("A1", "2024-06-01", 1, Stream::Wholesale, 400.0),
            entry("B2", "2024-06-01", 1, Stream::Wholesale, 500.0),
        ];

        let rows = aggregator.aggregate(&entries);
        let order: Vec<_> = rows.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(order, vec!["B2", "A1", "C3"]);

        // stable across repeated runs
        let again: Vec<_> = aggregator
            .aggregate(&entries)
            .iter()
            .map(|r| r.asset_id.clone())
            .collect();
        assert_eq!(again, vec!["B2", "A1", "C3"]);
    }
}
