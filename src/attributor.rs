use crate::errors::MissingPriceError;
use crate::models::{MarketRecord, RevenueEntry, SettlementPeriod, Stream};
use log::info;
use std::collections::BTreeMap;

/// Attributor output: one RevenueEntry per priced (asset, period, stream)
/// bucket, plus the buckets excluded for want of a price.
#[derive(Debug, Default)]
pub struct AttributionOutcome {
    pub entries: Vec<RevenueEntry>,
    pub missing_prices: Vec<MissingPriceError>,
}

/// Applies the stream pricing rules to normalized records. Pure and
/// deterministic: buckets are walked in key order.
pub struct RevenueAttributor;

impl RevenueAttributor {
    pub fn attribute(records: &[MarketRecord]) -> AttributionOutcome {
        let mut buckets: BTreeMap<(&str, SettlementPeriod, Stream), Vec<&MarketRecord>> =
            BTreeMap::new();
        for record in records {
            buckets
                .entry((record.asset_id.as_str(), record.period, record.stream))
                .or_default()
                .push(record);
        }

        let mut outcome = AttributionOutcome::default();
        for ((asset_id, period, stream), bucket) in buckets {
            match bucket_revenue(stream, &bucket) {
                Some(revenue_gbp) => outcome.entries.push(RevenueEntry {
                    asset_id: asset_id.to_string(),
                    period,
                    stream,
                    revenue_gbp,
                }),
                None => outcome.missing_prices.push(MissingPriceError {
                    asset_id: asset_id.to_string(),
                    period,
                    stream,
                }),
            }
        }

        if !outcome.missing_prices.is_empty() {
            info!(
                "excluded {} period buckets with volume but no price",
                outcome.missing_prices.len()
            );
        }
        outcome
    }
}

/// Revenue for one bucket, or None when volume exists without a price. A
/// missing price never counts as zero: that would understate a data gap as
/// "no revenue".
fn bucket_revenue(stream: Stream, bucket: &[&MarketRecord]) -> Option<f64> {
    let mut revenue = 0.0;
    for record in bucket {
        match record.price {
            Some(price) => {
                revenue += match stream {
                    // net PN deviation (MWh, export positive) × index price
                    Stream::Wholesale => record.volume * price,
                    // accepted MWh × accepted level price; bid/offer direction
                    // is carried by the volume sign
                    Stream::BalancingMechanism => record.volume * price,
                    // contracted MW × clearing price, already pro-rated to the
                    // settlement period by the normalizer
                    Stream::FrequencyResponse => record.volume * price,
                };
            }
            None if record.volume == 0.0 => {}
            None => return None,
        }
    }
    Some(revenue)
}
