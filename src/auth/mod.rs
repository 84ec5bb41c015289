use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::tracker::AuthenticatedUser;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Resolves API keys to user ids.
pub struct AuthService {
    api_keys: Arc<HashMap<String, i64>>,
}

impl AuthService {
    pub fn new(api_keys: HashMap<String, i64>) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
        }
    }

    pub fn identify(&self, key: &str) -> Option<i64> {
        if key.is_empty() {
            return None;
        }

        self.api_keys.get(key).copied()
    }
}

/// Mark requests carrying a known API key as authenticated.
///
/// Requests without a key, or with an unknown one, continue anonymously.
pub async fn identify_user(
    State(auth_service): State<Arc<AuthService>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if let Some(user_id) = auth_service.identify(api_key) {
        request.extensions_mut().insert(AuthenticatedUser(user_id));
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify() {
        let service = AuthService::new(HashMap::from([("secret".to_string(), 7)]));
        assert_eq!(service.identify("secret"), Some(7));
        assert_eq!(service.identify("wrong"), None);
        assert_eq!(service.identify(""), None);
    }
}
