//! Public IP geolocation lookups.
//!
//! Geolocation is advisory: it never influences session state. The session
//! manager swallows every failure here into an empty [`IpInfo`].
//!
//! [`IpApiLookup`] queries ip-api.com first and falls back to ipinfo.io when
//! the primary service fails or rate-limits us.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use url::Url;

use crate::constants;
use crate::error::GeoError;
use crate::state::IpInfo;

/// Read-only geolocation collaborator.
pub trait GeoLookup: Send + Sync {
    /// Looks up `ip`, or the caller's own public address when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError`] when no service produced usable data.
    fn lookup(&self, ip: Option<IpAddr>) -> Result<IpInfo, GeoError>;
}

/// Response body of ip-api.com.
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(flatten)]
    info: IpInfo,
}

/// Response body of ipinfo.io.
#[derive(Debug, Deserialize)]
struct IpInfoIoResponse {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    org: String,
}

impl From<IpInfoIoResponse> for IpInfo {
    fn from(resp: IpInfoIoResponse) -> Self {
        IpInfo {
            query: resp.ip,
            city: resp.city,
            country_code: resp.country.clone(),
            country: resp.country,
            isp: resp.org,
        }
    }
}

/// HTTP geolocation client with a fallback service.
pub struct IpApiLookup {
    client: Client,
    primary: Url,
    fallback: Option<Url>,
}

impl IpApiLookup {
    /// Builds a client for the default endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, GeoError> {
        Self::with_endpoints(
            constants::GEO_API_PRIMARY,
            Some(constants::GEO_API_FALLBACK),
            timeout,
        )
    }

    /// Builds a client for custom endpoints. Both must end with `/`.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError`] on an invalid URL or client build failure.
    pub fn with_endpoints(
        primary: &str,
        fallback: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, GeoError> {
        // A fresh socket per lookup so a tunnel coming up is reflected at once.
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .user_agent(format!("{}/{}", constants::APP_NAME, constants::APP_VERSION))
            .build()?;

        Ok(Self {
            client,
            primary: Url::parse(primary)?,
            fallback: fallback.map(Url::parse).transpose()?,
        })
    }

    fn query_ip_api(&self, ip: Option<IpAddr>) -> Result<IpInfo, GeoError> {
        let url = match ip {
            Some(ip) => self.primary.join(&ip.to_string())?,
            None => self.primary.clone(),
        };
        let resp: IpApiResponse = self.client.get(url).send()?.error_for_status()?.json()?;

        if resp.status == "fail" {
            tracing::debug!(message = %resp.message, "ip-api rejected lookup");
            return Err(GeoError::Empty);
        }
        non_empty(resp.info)
    }

    fn query_ipinfo(&self, base: &Url, ip: Option<IpAddr>) -> Result<IpInfo, GeoError> {
        let url = match ip {
            Some(ip) => base.join(&format!("{ip}/json"))?,
            None => base.join("json")?,
        };
        let resp: IpInfoIoResponse = self.client.get(url).send()?.error_for_status()?.json()?;
        non_empty(resp.into())
    }
}

fn non_empty(info: IpInfo) -> Result<IpInfo, GeoError> {
    if info.is_empty() {
        Err(GeoError::Empty)
    } else {
        Ok(info)
    }
}

impl GeoLookup for IpApiLookup {
    fn lookup(&self, ip: Option<IpAddr>) -> Result<IpInfo, GeoError> {
        match self.query_ip_api(ip) {
            Ok(info) => Ok(info),
            Err(primary_err) => {
                tracing::debug!(error = %primary_err, "primary geolocation lookup failed");
                match &self.fallback {
                    Some(base) => self.query_ipinfo(base, ip),
                    None => Err(primary_err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_api_success() {
        let json = r#"{"status":"success","country":"Austria","countryCode":"AT","city":"Vienna",
            "isp":"Example Telecom","query":"203.0.113.7"}"#;
        let resp: IpApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, "success");
        assert_eq!(resp.info.query, "203.0.113.7");
        assert_eq!(resp.info.country_code, "AT");
        assert_eq!(resp.info.isp, "Example Telecom");
    }

    #[test]
    fn test_parse_ip_api_failure() {
        let json = r#"{"status":"fail","message":"reserved range","query":"10.0.0.1"}"#;
        let resp: IpApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, "fail");
        assert_eq!(resp.message, "reserved range");
        assert!(resp.info.city.is_empty());
    }

    #[test]
    fn test_ipinfo_maps_org_to_isp() {
        let json = r#"{"ip":"203.0.113.7","city":"Vienna","country":"AT","org":"AS1 Example"}"#;
        let info: IpInfo = serde_json::from_str::<IpInfoIoResponse>(json).unwrap().into();
        assert_eq!(info.query, "203.0.113.7");
        assert_eq!(info.isp, "AS1 Example");
        assert_eq!(info.country_code, "AT");
    }

    #[test]
    fn test_non_empty_rejects_blank_info() {
        assert!(matches!(non_empty(IpInfo::default()), Err(GeoError::Empty)));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = IpApiLookup::with_endpoints("not a url", None, Duration::from_secs(1));
        assert!(matches!(result, Err(GeoError::Url(_))));
    }

    #[test]
    fn test_unreachable_service_is_an_error() {
        // Port 9 on loopback is discard; nothing listens there in CI.
        let lookup = IpApiLookup::with_endpoints(
            "http://127.0.0.1:9/json/",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(lookup.lookup(None).is_err());
    }
}
