//! Route Cache (§4.4): remembers, for the lifetime of the process, whether a
//! given host currently has a working DoH-discovered alternative route, so
//! repeated requests don't re-run DoH discovery on every call.
//!
//! The cache is process-wide (not per-`Session`) because route reachability
//! is a property of the network path, not of any one authenticated session —
//! mirrors the reference implementation's module-level cache.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::config::ALT_ROUTE_TTL;

struct AltRoute {
    url: String,
    stored_at: Instant,
}

fn cache() -> &'static Mutex<HashMap<String, AltRoute>> {
    static CACHE: OnceLock<Mutex<HashMap<String, AltRoute>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Decide whether a request for `host` should go straight to the original
/// URL, bypassing any cached alternative route.
///
/// Truth table (§4.4):
/// - `force_skip_alt = true` always wins: always use the original URL.
/// - otherwise, if alternative routing is disabled (`allow_alt = false`),
///   always use the original URL.
/// - otherwise, use the original URL unless a live (non-expired) alternative
///   route is cached for `host`.
pub fn try_original_url(host: &str, allow_alt: bool, force_skip_alt: bool) -> bool {
    if force_skip_alt || !allow_alt {
        return true;
    }
    get_alternative_url(host).is_none()
}

/// The cached alternative base URL for `host`, if one is stored and unexpired.
pub fn get_alternative_url(host: &str) -> Option<String> {
    let mut guard = cache().lock().unwrap();
    match guard.get(host) {
        Some(route) if route.stored_at.elapsed() < ALT_ROUTE_TTL => Some(route.url.clone()),
        Some(_) => {
            guard.remove(host);
            None
        }
        None => None,
    }
}

/// Record a working alternative route for `host`, valid for [`ALT_ROUTE_TTL`].
pub fn store_alternative_route(host: &str, url: String) {
    cache().lock().unwrap().insert(
        host.to_string(),
        AltRoute {
            url,
            stored_at: Instant::now(),
        },
    );
}

/// Drop any cached route for `host` (used after a route stops working).
pub fn invalidate(host: &str) {
    cache().lock().unwrap().remove(host);
}

/// Remaining time a stored route for `host` has before it expires, if any.
#[cfg(test)]
fn remaining_ttl(host: &str) -> Option<Duration> {
    let guard = cache().lock().unwrap();
    guard
        .get(host)
        .map(|r| ALT_ROUTE_TTL.saturating_sub(r.stored_at.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_host(tag: &str) -> String {
        format!("route-cache-test-{tag}.example")
    }

    #[test]
    fn force_skip_always_uses_original_even_with_cached_route() {
        let host = unique_host("force-skip");
        store_alternative_route(&host, "https://alt.example".to_string());
        assert!(try_original_url(&host, true, true));
    }

    #[test]
    fn disabled_alt_routing_uses_original_even_with_cached_route() {
        let host = unique_host("disabled");
        store_alternative_route(&host, "https://alt.example".to_string());
        assert!(try_original_url(&host, false, false));
    }

    #[test]
    fn cached_route_is_preferred_when_allowed() {
        let host = unique_host("cached");
        assert!(try_original_url(&host, true, false));
        store_alternative_route(&host, "https://alt.example".to_string());
        assert!(!try_original_url(&host, true, false));
        assert_eq!(
            get_alternative_url(&host),
            Some("https://alt.example".to_string())
        );
    }

    #[test]
    fn invalidate_clears_a_stored_route() {
        let host = unique_host("invalidate");
        store_alternative_route(&host, "https://alt.example".to_string());
        invalidate(&host);
        assert!(get_alternative_url(&host).is_none());
        assert!(try_original_url(&host, true, false));
    }

    #[test]
    fn fresh_route_has_nearly_full_ttl_remaining() {
        let host = unique_host("ttl");
        store_alternative_route(&host, "https://alt.example".to_string());
        let remaining = remaining_ttl(&host).expect("route was just stored");
        assert!(remaining > ALT_ROUTE_TTL - Duration::from_secs(5));
    }
}
