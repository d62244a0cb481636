//! The boundary to the HTTP transport.
//!
//! The engine never talks to the network itself. Online storages and the
//! local online fallback hand URLs to a [`CdnFetcher`] supplied by the caller.

use crate::error::{CascError, Result};
use crate::keys::hex_path;
use std::ops::Range;
use thiserror::Error;

/// Port used by the patch service serving `versions` and `cdns`.
pub const PATCH_SERVICE_PORT: u16 = 1119;

/// Why a fetch failed. `NotFound` is kept apart so lookups can apply the
/// not-found policy instead of aborting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("fetching {url} failed: {reason}")]
    Failed { url: String, reason: String },
}

impl From<FetchError> for CascError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::NotFound(url) => CascError::FileNotFound(url),
            FetchError::Failed { url, reason } => CascError::Transport { url, reason },
        }
    }
}

/// A byte-range capable fetch primitive.
///
/// `range` is a half-open byte range; `None` fetches the whole resource.
pub trait CdnFetcher: Send + Sync {
    fn fetch(&self, url: &str, range: Option<Range<u64>>) -> std::result::Result<Vec<u8>, FetchError>;
}

impl<F> CdnFetcher for F
where
    F: Fn(&str, Option<Range<u64>>) -> std::result::Result<Vec<u8>, FetchError> + Send + Sync,
{
    fn fetch(&self, url: &str, range: Option<Range<u64>>) -> std::result::Result<Vec<u8>, FetchError> {
        self(url, range)
    }
}

/// `http://{region}.patch.battle.net:1119/{product}/{manifest}`
pub fn patch_service_url(region: &str, product: &str, manifest: &str) -> String {
    format!("http://{region}.patch.battle.net:{PATCH_SERVICE_PORT}/{product}/{manifest}")
}

/// `http://{host}/{path}/config/xx/yy/{key}`
pub fn config_url(host: &str, path: &str, key: &str) -> Result<String> {
    Ok(format!(
        "http://{host}/{}/config/{}",
        path.trim_matches('/'),
        hex_path(key)?
    ))
}

/// `http://{host}/{path}/data/xx/yy/{key}{suffix}`, suffix being `""` or `".index"`.
pub fn data_url(host: &str, path: &str, key: &str, suffix: &str) -> Result<String> {
    Ok(format!(
        "http://{host}/{}/data/{}{suffix}",
        path.trim_matches('/'),
        hex_path(key)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_cdn_urls() {
        assert_eq!(
            patch_service_url("eu", "wow", "versions"),
            "http://eu.patch.battle.net:1119/wow/versions"
        );
        assert_eq!(
            config_url("cdn.example", "/tpr/wow/", "ABCDEF").unwrap(),
            "http://cdn.example/tpr/wow/config/ab/cd/abcdef"
        );
        assert_eq!(
            data_url("cdn.example", "tpr/wow", "abcdef", ".index").unwrap(),
            "http://cdn.example/tpr/wow/data/ab/cd/abcdef.index"
        );
    }

    #[test]
    fn not_found_and_transport_failures_stay_distinct() {
        let missing: CascError = FetchError::NotFound("u".into()).into();
        assert!(matches!(missing, CascError::FileNotFound(_)));
        let failed: CascError = FetchError::Failed {
            url: "u".into(),
            reason: "timeout".into(),
        }
        .into();
        assert!(matches!(failed, CascError::Transport { .. }));
    }

    #[test]
    fn closures_are_fetchers() {
        let fetcher = |url: &str, _: Option<Range<u64>>| -> std::result::Result<Vec<u8>, FetchError> {
            Ok(url.as_bytes().to_vec())
        };
        assert_eq!(fetcher.fetch("abc", None).unwrap(), b"abc");
    }
}
