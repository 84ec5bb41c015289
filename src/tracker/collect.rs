use std::net::IpAddr;

use super::RequestInfo;
use crate::device::UserAgentParser;
use crate::geo::{parse_accept_language, GeoIpService};
use crate::models::VisitorAttributes;

/// Optional enrichment sources for the location and language columns.
#[derive(Clone, Default)]
pub struct Enrichment {
    pub geoip: Option<GeoIpService>,
    pub browser_language: bool,
}

/// Build the visitor fields for the current request.
///
/// Without enrichment the location and language fields are `None`, which
/// leaves the stored columns untouched.
pub fn collect(
    request: &RequestInfo,
    parser: &dyn UserAgentParser,
    enrichment: &Enrichment,
) -> VisitorAttributes {
    let device = parser.classify(request.user_agent.as_deref().unwrap_or_default());

    let geo = enrichment.geoip.as_ref().and_then(|geoip| {
        request
            .ip
            .parse::<IpAddr>()
            .ok()
            .map(|ip| geoip.lookup(ip))
    });

    let language = if enrichment.browser_language {
        request
            .accept_language
            .as_deref()
            .and_then(parse_accept_language)
    } else {
        None
    };

    VisitorAttributes {
        ip: request.ip.clone(),
        user_id: request.user_id,
        user_agent: request.user_agent.clone(),
        is_mobile: device.is_mobile,
        is_desktop: device.is_desktop,
        is_bot: device.is_bot,
        bot: device.bot_name.unwrap_or_default(),
        os: device.os_name,
        browser_version: device.browser_version,
        browser: device.browser_name,
        geo,
        language,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceClassification, WootheeParser};

    struct FixedParser;

    impl UserAgentParser for FixedParser {
        fn classify(&self, user_agent: &str) -> DeviceClassification {
            DeviceClassification {
                is_bot: user_agent.contains("bot"),
                bot_name: user_agent.contains("bot").then(|| "TestBot".to_string()),
                os_name: "TestOS".to_string(),
                ..Default::default()
            }
        }
    }

    fn request() -> RequestInfo {
        RequestInfo::new("GET", "/")
            .with_route("home")
            .with_ip("198.51.100.23")
            .with_user_agent("Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0")
            .with_accept_language("nl-NL,nl;q=0.9")
    }

    #[test]
    fn test_collects_request_and_parser_fields() {
        let attributes = collect(&request().with_user(12), &WootheeParser::new(), &Enrichment::default());

        assert_eq!(attributes.ip, "198.51.100.23");
        assert_eq!(attributes.user_id, Some(12));
        assert!(attributes.user_agent.as_deref().unwrap().contains("Firefox"));
        assert!(attributes.is_desktop);
        assert!(!attributes.is_mobile);
        assert!(!attributes.is_bot);
        assert_eq!(attributes.bot, "");
        assert_eq!(attributes.browser, "Firefox");
        assert!(attributes.browser_version.starts_with("121"));
        assert_eq!(attributes.geo, None);
        assert_eq!(attributes.language, None);
    }

    #[test]
    fn test_collection_is_deterministic() {
        let parser = WootheeParser::new();
        let first = collect(&request(), &parser, &Enrichment::default());
        let second = collect(&request(), &parser, &Enrichment::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_user_agent_degrades() {
        let request = RequestInfo::new("GET", "/").with_ip("198.51.100.23");
        let attributes = collect(&request, &WootheeParser::new(), &Enrichment::default());

        assert_eq!(attributes.user_agent, None);
        assert!(!attributes.is_desktop && !attributes.is_mobile && !attributes.is_bot);
        assert_eq!(attributes.os, "");
        assert_eq!(attributes.browser, "");
        assert_eq!(attributes.user_id, None);
    }

    #[test]
    fn test_bot_name_comes_from_parser() {
        let request = RequestInfo::new("GET", "/").with_user_agent("somebot/1.0");
        let attributes = collect(&request, &FixedParser, &Enrichment::default());
        assert!(attributes.is_bot);
        assert_eq!(attributes.bot, "TestBot");
        assert_eq!(attributes.os, "TestOS");
    }

    #[test]
    fn test_browser_language_enrichment() {
        let enrichment = Enrichment {
            geoip: None,
            browser_language: true,
        };
        let attributes = collect(&request(), &FixedParser, &enrichment);
        let language = attributes.language.unwrap();
        assert_eq!(language.language, "nl-NL");
        assert_eq!(language.family, "nl");
    }
}
