//! Time handling: bucketing, alignment, rent/return proxy, and metro ridership
//! normalization.

mod align;
mod metro;
mod proxy;

pub use align::{align_by_key, align_series, bucket_len, bucket_start, Agg, Granularity};
pub use metro::{
    normalize_metro_timeseries, parse_timestamp, read_metro_csv, EpochUnit, MetroImportReport,
    MetroNormalizeOptions,
};
pub use proxy::compute_rent_return_proxy;
