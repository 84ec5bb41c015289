//! Client network and locale details
//!
//! - [`ip_extractor`]: resolve the client IP behind trusted proxies
//! - [`geoip`]: optional MaxMind lookups for the visitor location columns
//! - [`language`]: browser language from `Accept-Language`

pub mod geoip;
pub mod ip_extractor;
pub mod language;

pub use geoip::GeoIpService;
pub use ip_extractor::{extract_client_ip, TrustedProxies};
pub use language::parse_accept_language;
