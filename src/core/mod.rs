//! Background services of the helper: traffic accounting and geolocation.

pub mod geo;
mod proptest;
pub mod stats;

pub use geo::{GeoLookup, IpApiLookup};
pub use stats::StatsCounter;
