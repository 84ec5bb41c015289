//! GeoIP lookup using a MaxMind GeoLite2/GeoIP2 City database
//!
//! The database is memory-mapped once and shared between requests.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use crate::models::GeoFields;

/// Thread-safe City database reader.
#[derive(Clone)]
pub struct GeoIpService {
    city_reader: Arc<Reader<Mmap>>,
}

impl GeoIpService {
    /// Open the `.mmdb` file at `city_path`.
    pub fn new(city_path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(city_path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", city_path))?;

        Ok(Self {
            city_reader: Arc::new(reader),
        })
    }

    /// Open the database when a path is configured.
    pub fn from_path(city_path: Option<&str>) -> Result<Option<Self>> {
        city_path.map(Self::new).transpose()
    }

    /// Location for `ip`; unknown addresses yield empty fields.
    pub fn lookup(&self, ip: IpAddr) -> GeoFields {
        let mut fields = GeoFields::default();

        let Ok(result) = self.city_reader.lookup(ip) else {
            return fields;
        };

        match result.decode::<geoip2::City>() {
            Ok(Some(city)) => {
                fields.country_code = city.country.iso_code.unwrap_or_default().to_string();
                fields.country = city.country.names.english.unwrap_or_default().to_string();
                fields.city = city.city.names.english.unwrap_or_default().to_string();
                fields.lat = city.location.latitude;
                fields.long = city.location.longitude;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(%ip, error = %err, "failed to decode GeoIP record");
            }
        }

        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geoip_service_creation_invalid_path() {
        assert!(GeoIpService::new("/nonexistent/path.mmdb").is_err());
    }

    #[test]
    fn test_geoip_disabled_without_path() {
        assert!(GeoIpService::from_path(None).unwrap().is_none());
    }
}
