use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::monitoring::aggregator::FieldSource;
use crate::monitoring::types::Fields;

pub const LOCATION_CITY: &str = "LOCATION_CITY";
pub const LOCATION_COUNTRY: &str = "LOCATION_COUNTRY";
pub const LOCATION_REGION: &str = "LOCATION_REGION";

const GEOLOCATION_URL: &str = "http://ip-api.com/json/?fields=status,city,countryCode";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Response from ip-api.com geolocation service
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    city: String,
    #[serde(rename = "countryCode", default)]
    country_code: String,
    #[serde(default)]
    status: String,
}

/// Coarse location derived from the public IP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Location {
    /// City name (e.g., "New York", "London")
    pub city: Option<String>,
    /// ISO 3166-1 alpha-2 country code (e.g., "US", "GB", "JP")
    pub country: Option<String>,
    /// General region/continent (e.g., "North America", "Europe", "Asia")
    pub region: Option<String>,
}

impl Location {
    fn from_response(response: IpApiResponse) -> Result<Self> {
        if response.status != "success" {
            bail!("Geolocation lookup returned status '{}'", response.status);
        }
        let city = Some(response.city).filter(|city| !city.is_empty());
        let country = Some(response.country_code).filter(|code| !code.is_empty());
        let region = country.as_deref().map(|cc| Location::region_from_country(cc).to_string());
        Ok(Self { city, country, region })
    }

    /// Format location for display
    pub fn display(&self) -> String {
        let parts: Vec<&str> =
            [self.city.as_deref(), self.country.as_deref()].into_iter().flatten().collect();
        if parts.is_empty() {
            return self.region.clone().unwrap_or_else(|| "Unknown".to_string());
        }
        parts.join(", ")
    }

    fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        if let Some(city) = self.city {
            fields.insert(LOCATION_CITY, city);
        }
        if let Some(country) = self.country {
            fields.insert(LOCATION_COUNTRY, country);
        }
        if let Some(region) = self.region {
            fields.insert(LOCATION_REGION, region);
        }
        fields
    }

    /// Get region from country code (simplified mapping)
    pub fn region_from_country(country_code: &str) -> &'static str {
        match country_code {
            "US" | "CA" | "MX" => "North America",

            "GB" | "FR" | "DE" | "IT" | "ES" | "NL" | "BE" | "CH" | "AT" | "SE" | "NO" | "DK"
            | "FI" | "PL" | "CZ" | "PT" | "GR" | "IE" | "HU" | "RO" | "UA" => "Europe",

            "CN" | "JP" | "KR" | "IN" | "SG" | "HK" | "TW" | "TH" | "MY" | "ID" | "PH" | "VN" => {
                "Asia"
            }

            "BR" | "AR" | "CL" | "CO" | "PE" | "VE" | "EC" | "UY" => "South America",

            "AU" | "NZ" => "Oceania",

            "AE" | "SA" | "IL" | "TR" | "IR" | "IQ" | "JO" | "KW" | "QA" | "BH" | "OM" => {
                "Middle East"
            }

            "ZA" | "EG" | "NG" | "KE" | "MA" | "GH" | "ET" | "TZ" | "UG" => "Africa",

            _ => "Other",
        }
    }
}

struct CachedLocation {
    location: Location,
    fetched_at: Instant,
}

/// IP geolocation, looked up at most once per refresh interval.
///
/// A failed refresh keeps serving the last good location; with no location
/// at all the source reports no fields.
pub struct LocationSource {
    client: reqwest::Client,
    url: String,
    refresh_interval: Duration,
    cache: Mutex<Option<CachedLocation>>,
}

impl LocationSource {
    pub fn new(refresh_interval: Duration) -> Result<Self> {
        Self::with_url(GEOLOCATION_URL, refresh_interval)
    }

    pub fn with_url(url: &str, refresh_interval: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
        Ok(Self { client, url: url.to_string(), refresh_interval, cache: Mutex::new(None) })
    }

    fn cached(&self, fresh_only: bool) -> Option<Location> {
        let cache = self.cache.lock().ok()?;
        let cached = cache.as_ref()?;
        if fresh_only && cached.fetched_at.elapsed() >= self.refresh_interval {
            return None;
        }
        Some(cached.location.clone())
    }

    async fn fetch(&self) -> Result<Location> {
        let response = self.client.get(&self.url).send().await?.json::<IpApiResponse>().await?;
        Location::from_response(response)
    }
}

#[async_trait]
impl FieldSource for LocationSource {
    fn name(&self) -> &'static str {
        "location"
    }

    async fn get_fields(&self) -> Result<Fields> {
        if let Some(location) = self.cached(true) {
            return Ok(location.into_fields());
        }

        match self.fetch().await {
            Ok(location) => {
                info!("Location updated: {}", location.display());
                if let Ok(mut cache) = self.cache.lock() {
                    *cache = Some(CachedLocation { location: location.clone(), fetched_at: Instant::now() });
                }
                Ok(location.into_fields())
            }
            Err(e) => match self.cached(false) {
                Some(stale) => {
                    warn!("Location refresh failed, keeping previous: {:#}", e);
                    Ok(stale.into_fields())
                }
                None => Err(e),
            },
        }
    }
}
