use woothee::parser::Parser;

use super::{DeviceClassification, UserAgentParser};

const UNKNOWN: &str = "UNKNOWN";

const CATEGORY_PC: &str = "pc";
const CATEGORY_SMARTPHONE: &str = "smartphone";
const CATEGORY_MOBILEPHONE: &str = "mobilephone";
const CATEGORY_CRAWLER: &str = "crawler";

/// [`UserAgentParser`] backed by the woothee project rules.
pub struct WootheeParser {
    parser: Parser,
}

impl WootheeParser {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }
}

impl Default for WootheeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl UserAgentParser for WootheeParser {
    fn classify(&self, user_agent: &str) -> DeviceClassification {
        let user_agent = user_agent.trim();
        if user_agent.is_empty() {
            return DeviceClassification::default();
        }

        let Some(result) = self.parser.parse(user_agent) else {
            return DeviceClassification::default();
        };

        let is_bot = result.category == CATEGORY_CRAWLER;

        DeviceClassification {
            is_mobile: matches!(
                result.category,
                CATEGORY_SMARTPHONE | CATEGORY_MOBILEPHONE
            ),
            is_desktop: result.category == CATEGORY_PC,
            is_bot,
            bot_name: if is_bot {
                known(result.name).map(str::to_string)
            } else {
                None
            },
            os_name: known(result.os).unwrap_or_default().to_string(),
            browser_name: if is_bot {
                String::new()
            } else {
                known(result.name).unwrap_or_default().to_string()
            },
            browser_version: if is_bot {
                String::new()
            } else {
                known(result.version).unwrap_or_default().to_string()
            },
        }
    }
}

fn known(value: &str) -> Option<&str> {
    if value.is_empty() || value == UNKNOWN {
        None
    } else {
        Some(value)
    }
}
