//! Mapping of request URLs to low-cardinality `uri` tag values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Strategy for turning a request URL into the `uri` tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlMapper {
    /// Path component only, as sent on the wire (`/users/42`)
    #[default]
    EncodedPath,
    /// Complete URL including scheme, host and query
    FullUrl,
    /// Registrable domain of the host (`api.eu.example.com` -> `example.com`)
    TopPrivateDomain,
}

impl UrlMapper {
    pub fn map(&self, url: &reqwest::Url) -> String {
        match self {
            UrlMapper::EncodedPath => url.path().to_string(),
            UrlMapper::FullUrl => url.as_str().to_string(),
            UrlMapper::TopPrivateDomain => url
                .host_str()
                .map(top_private_domain)
                .unwrap_or_else(|| "none".to_string()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UrlMapper::EncodedPath => "encoded_path",
            UrlMapper::FullUrl => "full_url",
            UrlMapper::TopPrivateDomain => "top_private_domain",
        }
    }
}

impl fmt::Display for UrlMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UrlMapper {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "encoded_path" => Ok(UrlMapper::EncodedPath),
            "full_url" => Ok(UrlMapper::FullUrl),
            "top_private_domain" => Ok(UrlMapper::TopPrivateDomain),
            other => Err(format!(
                "unknown url mapper '{other}', expected one of: encoded_path, full_url, top_private_domain"
            )),
        }
    }
}

/// Registrable domain of a host, one label below its public suffix
///
/// Uses the public suffix list, private registries included, so
/// `api.example.co.uk` maps to `example.co.uk` and `me.github.io` stays
/// whole. IP literals and hosts that are themselves a public suffix are
/// returned as given.
pub fn top_private_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return host;
    }

    match psl::domain_str(&host) {
        Some(domain) => domain.to_string(),
        None => host,
    }
}
