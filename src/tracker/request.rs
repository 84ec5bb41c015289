/// Snapshot of the request fields the recorder looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Symbolic route name; `None` for requests that matched no route
    pub route_name: Option<String>,
    pub method: String,
    pub ip: String,
    pub user_agent: Option<String>,
    /// Id of the authenticated user, `None` for anonymous requests
    pub user_id: Option<i64>,
    pub host: String,
    pub referer: Option<String>,
    pub is_secure: bool,
    pub is_ajax: bool,
    /// Path without surrounding slashes, `/` for the root
    pub path: String,
    pub accept_language: Option<String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: &str) -> Self {
        Self {
            route_name: None,
            method: method.into(),
            ip: String::new(),
            user_agent: None,
            user_id: None,
            host: String::new(),
            referer: None,
            is_secure: false,
            is_ajax: false,
            path: normalize_path(path),
            accept_language: None,
        }
    }

    pub fn with_route(mut self, route_name: impl Into<String>) -> Self {
        self.route_name = Some(route_name.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_accept_language(mut self, accept_language: impl Into<String>) -> Self {
        self.accept_language = Some(accept_language.into());
        self
    }

    pub fn secure(mut self, is_secure: bool) -> Self {
        self.is_secure = is_secure;
        self
    }

    pub fn ajax(mut self, is_ajax: bool) -> Self {
        self.is_ajax = is_ajax;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// `/blog/post/` -> `blog/post`, `/` -> `/`
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/about"), "about");
        assert_eq!(normalize_path("/blog/post/"), "blog/post");
    }

    #[test]
    fn test_authenticated() {
        assert!(!RequestInfo::new("GET", "/").is_authenticated());
        assert!(RequestInfo::new("GET", "/").with_user(3).is_authenticated());
    }
}
