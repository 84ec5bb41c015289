use std::fmt;

use super::RequestInfo;
use crate::config::TrackerConfig;

/// Why a request was not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Route name is listed in `skip_routes`
    Route,
    /// Method is not listed in `allowed_methods`
    Method,
    /// Authenticated traffic is not tracked
    Authenticated,
    /// Anonymous traffic is not tracked
    Unauthenticated,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::Route => "skipped route",
            SkipReason::Method => "method not allowed",
            SkipReason::Authenticated => "authenticated visitors not tracked",
            SkipReason::Unauthenticated => "unauthenticated visitors not tracked",
        };
        f.write_str(reason)
    }
}

/// Gating rules, evaluated in order; the first match wins.
pub fn skip_reason(config: &TrackerConfig, request: &RequestInfo) -> Option<SkipReason> {
    if let Some(route) = request.route_name.as_deref() {
        if config.skip_routes.iter().any(|skip| skip == route) {
            return Some(SkipReason::Route);
        }
    }

    if !config
        .allowed_methods
        .iter()
        .any(|method| method.eq_ignore_ascii_case(&request.method))
    {
        return Some(SkipReason::Method);
    }

    if request.is_authenticated() {
        if !config.track_authenticated_visitors {
            return Some(SkipReason::Authenticated);
        }
    } else if !config.track_unauthenticated_visitors {
        return Some(SkipReason::Unauthenticated);
    }

    None
}
