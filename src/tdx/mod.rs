//! TDX (Transport Data eXchange) ingestion: HTTP client, record parsers,
//! response cache and the bronze collector.

mod cache;
mod client;
mod collect;
mod parse;
mod rate_limit;

pub use cache::ResponseCache;
pub use client::{build_url, split_page, TdxClient, TdxCredentials, TdxError};
pub use collect::{collect_snapshot, CollectOptions, CollectReport};
pub use parse::{parse_bike_availability, parse_bike_station, parse_metro_station};
pub use rate_limit::RateLimiter;
