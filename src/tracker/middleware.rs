use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, uri::Scheme, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::error;

use super::{RecordOutcome, RequestInfo, VisitRecorder};
use crate::config::{SessionConfig, TrackerConfig};
use crate::geo::ip_extractor::{extract_client_ip, forwarded_https, TrustedProxies};
use crate::session::{SessionContext, SessionStore};

/// Id of the signed-in user, inserted into the request extensions by the
/// application's authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub i64);

/// Symbolic names for route paths, e.g. `/api/health` -> `api.health`.
///
/// Routes without a registered name are recorded under their path pattern.
#[derive(Debug, Clone, Default)]
pub struct RouteNames {
    names: HashMap<String, String>,
}

impl RouteNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, path: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(path.into(), name.into());
        self
    }

    pub fn resolve(&self, matched_path: &str) -> String {
        self.names
            .get(matched_path)
            .cloned()
            .unwrap_or_else(|| matched_path.to_string())
    }
}

/// Shared state of the [`track_visits`] middleware.
pub struct TrackingState {
    recorder: Arc<VisitRecorder>,
    sessions: Arc<dyn SessionStore>,
    route_names: RouteNames,
    proxies: TrustedProxies,
    session: SessionConfig,
}

impl TrackingState {
    pub fn new(
        recorder: Arc<VisitRecorder>,
        sessions: Arc<dyn SessionStore>,
        route_names: RouteNames,
    ) -> anyhow::Result<Self> {
        let config: &TrackerConfig = recorder.config();
        let proxies = TrustedProxies::from_config(&config.client_ip)?;
        let session = config.session.clone();

        Ok(Self {
            recorder,
            sessions,
            route_names,
            proxies,
            session,
        })
    }

    fn request_info(&self, request: &Request) -> RequestInfo {
        let headers = request.headers();

        let route_name = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| self.route_names.resolve(path.as_str()));

        let socket_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let ip = extract_client_ip(headers, socket_ip, &self.proxies)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let host = header_str(headers, header::HOST)
            .map(str::to_string)
            .or_else(|| request.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();

        let is_secure = request.uri().scheme() == Some(&Scheme::HTTPS)
            || forwarded_https(headers, &self.proxies);

        let is_ajax = header_str(headers, "x-requested-with")
            .map(|value| value.eq_ignore_ascii_case("XMLHttpRequest"))
            .unwrap_or(false);

        let mut info = RequestInfo::new(request.method().as_str(), request.uri().path())
            .with_ip(ip.to_string())
            .with_host(host)
            .secure(is_secure)
            .ajax(is_ajax);

        info.route_name = route_name;
        info.user_agent = header_str(headers, header::USER_AGENT).map(str::to_string);
        info.referer = header_str(headers, header::REFERER).map(str::to_string);
        info.accept_language = header_str(headers, header::ACCEPT_LANGUAGE).map(str::to_string);
        info.user_id = request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|AuthenticatedUser(id)| *id);

        info
    }

    fn session_cookie(&self, session_id: &str) -> Cookie<'static> {
        Cookie::build((self.session.cookie_name.clone(), session_id.to_string()))
            .http_only(true)
            .secure(self.session.secure_cookie)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(cookie_max_age(self.session.ttl_secs))
            .build()
    }
}

/// Cookie lifetime matching the session idle TTL, clamped to what a
/// cookie can express.
fn cookie_max_age(ttl_secs: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX))
}

fn header_str<K: header::AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Record the request before handing it to the route handler.
///
/// Mount with `Router::route_layer(from_fn_with_state(state, track_visits))`
/// so the matched route is known. On success the persisted
/// [`Visitor`](crate::models::Visitor) is available to handlers as an
/// extension. Recording failures are logged and never fail the request.
///
/// The session cookie is (re)sent on every response of a session that was
/// already known or that just recorded a visit, so its expiry slides along
/// with the server-side idle TTL.
pub async fn track_visits(
    State(state): State<Arc<TrackingState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let existing_session = jar
        .get(&state.session.cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|id| !id.is_empty());

    let is_new_session = existing_session.is_none();
    let session = match existing_session {
        Some(id) => SessionContext::new(Arc::clone(&state.sessions), id),
        None => SessionContext::generate(Arc::clone(&state.sessions)),
    };

    let info = state.request_info(&request);
    let mut issue_cookie = !is_new_session;

    match state.recorder.record_visit(&info, &session).await {
        Ok(RecordOutcome::Recorded(recorded)) => {
            issue_cookie = true;
            let recorded = *recorded;
            request.extensions_mut().insert(recorded.visitor);
        }
        Ok(RecordOutcome::Skipped(_)) => {}
        Err(err) => {
            error!(
                error = %err,
                path = %info.path,
                method = %info.method,
                "failed to record visit"
            );
        }
    }

    let response = next.run(request).await;

    if issue_cookie {
        (jar.add(state.session_cookie(session.id())), response).into_response()
    } else {
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_names_fall_back_to_path() {
        let names = RouteNames::new()
            .name("/", "home")
            .name("/api/health", "api.health");

        assert_eq!(names.resolve("/"), "home");
        assert_eq!(names.resolve("/api/health"), "api.health");
        assert_eq!(names.resolve("/posts/{id}"), "/posts/{id}");
    }

    #[test]
    fn test_cookie_max_age_clamps_large_ttl() {
        assert_eq!(cookie_max_age(7200), time::Duration::seconds(7200));
        assert_eq!(cookie_max_age(u64::MAX), time::Duration::seconds(i64::MAX));
    }
}
