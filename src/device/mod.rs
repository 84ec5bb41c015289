//! User-agent classification
//!
//! The recorder only depends on the [`UserAgentParser`] trait; the default
//! implementation is backed by the `woothee` rule set.

pub mod woothee_parser;

pub use woothee_parser::WootheeParser;

/// Device and client information derived from a user-agent string.
///
/// The three device flags are independent of each other. Unknown values are
/// empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceClassification {
    pub is_mobile: bool,
    pub is_desktop: bool,
    pub is_bot: bool,
    pub bot_name: Option<String>,
    pub os_name: String,
    pub browser_name: String,
    pub browser_version: String,
}

/// Classifies raw user-agent strings.
///
/// Implementations must be deterministic and must not fail: input that
/// cannot be parsed yields [`DeviceClassification::default`].
pub trait UserAgentParser: Send + Sync {
    fn classify(&self, user_agent: &str) -> DeviceClassification;
}
