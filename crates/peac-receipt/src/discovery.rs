//! SSRF-safe JWKS discovery with a 5-minute in-memory TTL cache (§4.6
//! `issuer.discovery`).

use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use peac_error::{ErrorCode, PeacError};

use crate::jwk::Jwks;

const CACHE_TTL: Duration = Duration::from_secs(300);
const WELL_KNOWN_ISSUER_PATH: &str = "/.well-known/peac-issuer.json";
const WELL_KNOWN_JWKS_PATH: &str = "/.well-known/jwks.json";

struct CacheEntry {
    jwks: Jwks,
    fetched_at: Instant,
}

/// Caches JWKS documents per issuer origin for [`CACHE_TTL`].
#[derive(Default)]
pub struct JwksCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl JwksCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn get_fresh(&self, origin: &str) -> Option<Jwks> {
        let entries = self.entries.lock().unwrap();
        entries.get(origin).and_then(|e| {
            if e.fetched_at.elapsed() < CACHE_TTL {
                Some(e.jwks.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, origin: &str, jwks: Jwks) {
        self.entries.lock().unwrap().insert(
            origin.to_string(),
            CacheEntry {
                jwks,
                fetched_at: Instant::now(),
            },
        );
    }
}

/// Refuse to resolve and fetch targets that aren't a plain public host:
/// loopback, private, link-local, unspecified, and multicast ranges are all
/// blocked, covering the common cloud-metadata address (`169.254.169.254`)
/// under link-local.
fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_multicast()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // unique local (fc00::/7)
        }
    }
}

fn guard_host(host: &str) -> Result<(), PeacError> {
    let lookup = format!("{host}:443");
    let resolved = lookup.to_socket_addrs().map_err(|e| {
        PeacError::new(ErrorCode::VerifyNetworkError, format!("dns resolution failed: {e}"))
    })?;
    let mut any = false;
    for addr in resolved {
        any = true;
        if is_blocked_ip(addr.ip()) {
            tracing::warn!(host, addr = %addr.ip(), "blocked discovery target");
            return Err(PeacError::new(
                ErrorCode::VerifyNetworkBlocked,
                format!("host '{host}' resolves to a disallowed address"),
            ));
        }
    }
    if !any {
        return Err(PeacError::new(
            ErrorCode::VerifyNetworkError,
            format!("host '{host}' did not resolve to any address"),
        ));
    }
    Ok(())
}

/// Fetch the JWKS for `issuer_origin` (an `https://host[:port]` string),
/// trying `/.well-known/peac-issuer.json` then falling back to
/// `/.well-known/jwks.json`, with the SSRF guard applied before any request
/// and a 5-second total timeout (§4.6, §5).
pub async fn discover_jwks(
    cache: &JwksCache,
    issuer_origin: &str,
    discovery_timeout_ms: u64,
    max_jwks_keys: usize,
) -> Result<Jwks, PeacError> {
    if let Some(jwks) = cache.get_fresh(issuer_origin) {
        return Ok(jwks);
    }

    let url = reqwest::Url::parse(issuer_origin)
        .map_err(|e| PeacError::new(ErrorCode::VerifyNetworkError, e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| PeacError::new(ErrorCode::VerifyNetworkError, "issuer origin has no host"))?;
    guard_host(host)?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(discovery_timeout_ms))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| PeacError::new(ErrorCode::VerifyNetworkError, e.to_string()))?;

    let jwks = match fetch_jwks_at(&client, issuer_origin, WELL_KNOWN_ISSUER_PATH).await {
        Ok(jwks) => jwks,
        Err(_) => fetch_jwks_at(&client, issuer_origin, WELL_KNOWN_JWKS_PATH).await?,
    };

    if jwks.keys.len() > max_jwks_keys {
        return Err(PeacError::new(
            ErrorCode::VerifyNetworkError,
            format!("JWKS carries {} keys, exceeds max_jwks_keys {max_jwks_keys}", jwks.keys.len()),
        ));
    }

    tracing::debug!(issuer = issuer_origin, keys = jwks.keys.len(), "fetched jwks");
    cache.insert(issuer_origin, jwks.clone());
    Ok(jwks)
}

async fn fetch_jwks_at(
    client: &reqwest::Client,
    origin: &str,
    path: &str,
) -> Result<Jwks, PeacError> {
    let url = format!("{}{}", origin.trim_end_matches('/'), path);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| PeacError::new(ErrorCode::VerifyNetworkError, e.to_string()))?;
    if !response.status().is_success() {
        return Err(PeacError::new(
            ErrorCode::VerifyNetworkError,
            format!("discovery fetch at {url} returned {}", response.status()),
        ));
    }
    response
        .json::<DiscoveryDocument>()
        .await
        .map_err(|e| PeacError::new(ErrorCode::VerifyNetworkError, e.to_string()))
        .map(|doc| doc.into_jwks())
}

/// Either a bare JWKS document or a `peac-issuer.json` document wrapping one
/// under a `jwks` field.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum DiscoveryDocument {
    Bare(Jwks),
    Wrapped { jwks: Jwks },
}

impl DiscoveryDocument {
    fn into_jwks(self) -> Jwks {
        match self {
            Self::Bare(jwks) => jwks,
            Self::Wrapped { jwks } => jwks,
        }
    }
}
