//! Optional MMDB-backed location enrichment for verified records

use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Location attributes a verified proxy record carries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeoDetails {
    /// ISO 3166-1 alpha-2 country code (e.g., "IR", "US")
    pub country: Option<String>,
    /// City name in English
    pub city: Option<String>,
}

impl GeoDetails {
    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.city.is_none()
    }
}

/// GeoLocator for looking up IP addresses in MMDB databases
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the location details for an IpAddr
    pub fn lookup(&self, ip: IpAddr) -> Result<GeoDetails> {
        let lookup_result = self.reader.lookup(ip)?;

        // Decode the City data from the lookup result
        let city: Option<geoip2::City> = lookup_result.decode()?;

        let Some(city) = city else {
            return Ok(GeoDetails::default());
        };

        Ok(GeoDetails {
            country: city.country.iso_code.map(String::from),
            city: city.city.names.english.map(String::from),
        })
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}
