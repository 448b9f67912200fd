use crate::models::{SettlementPeriod, Stream};
use chrono::NaiveDate;
use thiserror::Error;

/// A raw feed record the normalizer refused. Carries the offending payload so
/// the batch can continue while the reject stays diagnosable.
#[derive(Debug, Clone, Error)]
#[error("malformed {stream} record: {reason} ({payload})")]
pub struct MalformedRecordError {
    pub stream: Stream,
    pub reason: String,
    pub payload: String,
}

/// A (asset, period, stream) bucket with volume but no matching price. The
/// bucket is excluded from that stream's revenue rather than counted as zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no {stream} price for {asset_id} at {period}")]
pub struct MissingPriceError {
    pub asset_id: String,
    pub period: SettlementPeriod,
    pub stream: Stream,
}

/// A feed fetch that failed outright. Surfaced to the caller per
/// (stream, date); retry policy belongs to the fetch collaborator.
#[derive(Debug, Clone, Error)]
#[error("upstream unavailable for {stream} feed on {date}: {reason}")]
pub struct UpstreamUnavailableError {
    pub stream: Stream,
    pub date: NaiveDate,
    pub reason: String,
}
