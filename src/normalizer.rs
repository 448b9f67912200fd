use crate::errors::MalformedRecordError;
use crate::feed::{AcceptanceRecord, DfrRecord, MidRecord, PnRecord};
use crate::models::{AssetRegister, MarketRecord, SettlementPeriod, Stream, PERIOD_HOURS};
use log::{debug, info, warn};
use std::collections::HashMap;

/// Raw feed payloads gathered for one reporting window, in feed shape.
#[derive(Debug, Default, Clone)]
pub struct RawBatch {
    pub pns: Vec<PnRecord>,
    pub mids: Vec<MidRecord>,
    pub acceptances: Vec<AcceptanceRecord>,
    pub dfr_results: Vec<DfrRecord>,
}

/// Normalizer output: the unified ordered record sequence plus the rejects
/// collected along the way. A reject never aborts the rest of the batch.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<MarketRecord>,
    pub rejects: Vec<MalformedRecordError>,
}

/// Converts heterogeneous feed records into per-asset, per-period
/// MarketRecords keyed by (asset, period, stream).
pub struct MarketDataNormalizer<'a> {
    register: &'a AssetRegister,
}

impl<'a> MarketDataNormalizer<'a> {
    pub fn new(register: &'a AssetRegister) -> Self {
        Self { register }
    }

    pub fn normalize(&self, raw: &RawBatch) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();

        let index_prices = self.build_index_prices(&raw.mids, &mut batch.rejects);
        self.normalize_pns(&raw.pns, &index_prices, &mut batch);
        self.normalize_acceptances(&raw.acceptances, &mut batch);
        self.normalize_dfr(&raw.dfr_results, &mut batch);

        for reject in &batch.rejects {
            warn!("{}", reject);
        }

        batch.records.sort_by(|a, b| {
            a.asset_id
                .cmp(&b.asset_id)
                .then(a.period.cmp(&b.period))
                .then(a.stream.cmp(&b.stream))
        });

        info!(
            "normalized {} market records ({} rejected)",
            batch.records.len(),
            batch.rejects.len()
        );
        batch
    }

    /// Volume-weighted market index price per period across providers.
    /// Periods whose quotes carry no volume get no price at all.
    fn build_index_prices(
        &self,
        mids: &[MidRecord],
        rejects: &mut Vec<MalformedRecordError>,
    ) -> HashMap<SettlementPeriod, f64> {
        let mut weighted: HashMap<SettlementPeriod, (f64, f64)> = HashMap::new();

        for mid in mids {
            let period = match validate_period(mid.settlement_date, mid.settlement_period) {
                Ok(period) => period,
                Err(reason) => {
                    rejects.push(reject(Stream::Wholesale, reason, mid));
                    continue;
                }
            };
            if !mid.price.is_finite() || !mid.volume.is_finite() {
                rejects.push(reject(Stream::Wholesale, "non-finite price or volume", mid));
                continue;
            }
            if mid.volume < 0.0 {
                rejects.push(reject(Stream::Wholesale, "negative index volume", mid));
                continue;
            }
            let entry = weighted.entry(period).or_insert((0.0, 0.0));
            entry.0 += mid.price * mid.volume;
            entry.1 += mid.volume;
        }

        weighted
            .into_iter()
            .filter(|(_, (_, volume))| *volume > 0.0)
            .map(|(period, (weighted_price, volume))| (period, weighted_price / volume))
            .collect()
    }

    /// Net PN energy per (asset, period): the trapezoidal integral of each
    /// level ramp, summed over the slices inside the period. Export positive.
    fn normalize_pns(
        &self,
        pns: &[PnRecord],
        index_prices: &HashMap<SettlementPeriod, f64>,
        batch: &mut NormalizedBatch,
    ) {
        let mut net_mwh: HashMap<(String, SettlementPeriod), f64> = HashMap::new();

        for pn in pns {
            // PN requests are fleet-scoped, so an unknown unit is malformed.
            if !self.register.contains(&pn.bm_unit) {
                batch
                    .rejects
                    .push(reject(Stream::Wholesale, "unknown asset", pn));
                continue;
            }
            let period = match validate_period(pn.settlement_date, pn.settlement_period) {
                Ok(period) => period,
                Err(reason) => {
                    batch.rejects.push(reject(Stream::Wholesale, reason, pn));
                    continue;
                }
            };
            if !pn.level_from.is_finite() || !pn.level_to.is_finite() {
                batch
                    .rejects
                    .push(reject(Stream::Wholesale, "non-finite level", pn));
                continue;
            }
            if pn.time_to <= pn.time_from {
                batch
                    .rejects
                    .push(reject(Stream::Wholesale, "non-positive slice duration", pn));
                continue;
            }

            let hours = (pn.time_to - pn.time_from).num_seconds() as f64 / 3600.0;
            let slice_mwh = (pn.level_from + pn.level_to) / 2.0 * hours;
            *net_mwh.entry((pn.bm_unit.clone(), period)).or_insert(0.0) += slice_mwh;
        }

        for ((asset_id, period), volume) in net_mwh {
            batch.records.push(MarketRecord {
                asset_id,
                period,
                stream: Stream::Wholesale,
                volume,
                // absent index price is kept as None and excluded downstream
                price: index_prices.get(&period).copied(),
            });
        }
    }

    /// BM acceptances already carry their accepted price; the feed is
    /// market-wide, so units outside the fleet are filtered, not rejected.
    fn normalize_acceptances(&self, acceptances: &[AcceptanceRecord], batch: &mut NormalizedBatch) {
        for acceptance in acceptances {
            if !self.register.contains(&acceptance.bm_unit) {
                debug!("skipping BM acceptance for non-fleet unit {}", acceptance.bm_unit);
                continue;
            }
            let period =
                match validate_period(acceptance.settlement_date, acceptance.settlement_period) {
                    Ok(period) => period,
                    Err(reason) => {
                        batch
                            .rejects
                            .push(reject(Stream::BalancingMechanism, reason, acceptance));
                        continue;
                    }
                };
            if !acceptance.accepted_volume.is_finite() || !acceptance.accepted_price.is_finite() {
                batch.rejects.push(reject(
                    Stream::BalancingMechanism,
                    "non-finite volume or price",
                    acceptance,
                ));
                continue;
            }

            batch.records.push(MarketRecord {
                asset_id: acceptance.bm_unit.clone(),
                period,
                stream: Stream::BalancingMechanism,
                volume: acceptance.accepted_volume,
                price: Some(acceptance.accepted_price),
            });
        }
    }

    /// DFR auctions clear per 4-hour EFA block in £/MW/h. Each block is
    /// expanded to its eight settlement periods with the price pro-rated to
    /// £/MW per half-hour, so revenue = volume × price holds downstream.
    fn normalize_dfr(&self, results: &[DfrRecord], batch: &mut NormalizedBatch) {
        for result in results {
            if result.cancelled {
                debug!("skipping cancelled DFR result for {}", result.unit_name);
                continue;
            }
            let asset = match self.register.by_dfr_unit(&result.unit_name) {
                Some(asset) => asset,
                None => {
                    // auction results cover the whole market, not just the fleet
                    debug!("skipping DFR result for non-fleet unit {}", result.unit_name);
                    continue;
                }
            };
            if !(1..=6).contains(&result.efa_block) {
                batch.rejects.push(reject(
                    Stream::FrequencyResponse,
                    "EFA block outside 1..=6",
                    result,
                ));
                continue;
            }
            if !result.cleared_volume_mw.is_finite() || result.cleared_volume_mw < 0.0 {
                batch.rejects.push(reject(
                    Stream::FrequencyResponse,
                    "invalid cleared volume",
                    result,
                ));
                continue;
            }
            if !result.clearing_price.is_finite() {
                batch.rejects.push(reject(
                    Stream::FrequencyResponse,
                    "non-finite clearing price",
                    result,
                ));
                continue;
            }

            let first = (result.efa_block - 1) * 8 + 1;
            for index in first..first + 8 {
                // block periods stay within 1..=48, so this cannot fail
                let Some(period) = SettlementPeriod::new(result.efa_date, index) else {
                    continue;
                };
                batch.records.push(MarketRecord {
                    asset_id: asset.asset_id.clone(),
                    period,
                    stream: Stream::FrequencyResponse,
                    volume: result.cleared_volume_mw,
                    price: Some(result.clearing_price * PERIOD_HOURS),
                });
            }
        }
    }
}

fn validate_period(
    date: chrono::NaiveDate,
    period: u16,
) -> Result<SettlementPeriod, &'static str> {
    u8::try_from(period)
        .ok()
        .and_then(|p| SettlementPeriod::new(date, p))
        .ok_or("settlement period outside 1..=50")
}

fn reject<R: std::fmt::Debug>(
    stream: Stream,
    reason: impl Into<String>,
    payload: &R,
) -> MalformedRecordError {
    MalformedRecordError {
        stream,
        reason: reason.into(),
        payload: format!("{:?}", payload),
    }
}
