use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted visitor row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visitor {
    pub id: i64,
    /// Session-scoped identifier, independent of the row id
    pub unique_id: String,
    pub user_id: Option<i64>,
    pub ip: String,
    pub user_agent: Option<String>,
    pub is_desktop: bool,
    pub is_mobile: bool,
    pub is_bot: bool,
    pub bot: Option<String>,
    pub os: String,
    pub browser_version: String,
    pub browser: String,
    pub country: String,
    pub country_code: String,
    pub city: String,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub browser_language_family: String,
    pub browser_language: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields collected from the current request and the user-agent parser.
///
/// These overwrite the stored visitor on every tracked request. `geo` and
/// `language` are only present when the matching enrichment is enabled;
/// when absent the stored columns are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisitorAttributes {
    pub ip: String,
    pub user_id: Option<i64>,
    pub user_agent: Option<String>,
    pub is_mobile: bool,
    pub is_desktop: bool,
    pub is_bot: bool,
    pub bot: String,
    pub os: String,
    pub browser_version: String,
    pub browser: String,
    pub geo: Option<GeoFields>,
    pub language: Option<LanguageFields>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoFields {
    pub country: String,
    pub country_code: String,
    pub city: String,
    pub lat: Option<f64>,
    pub long: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LanguageFields {
    /// Primary subtag, at most 4 chars (e.g. "en")
    pub family: String,
    /// Full tag, at most 7 chars (e.g. "en-US")
    pub language: String,
}

/// A visitor about to be written: `id` is `None` for a visitor that has no
/// row yet.
#[derive(Debug, Clone, Serialize)]
pub struct VisitorUpsert {
    pub id: Option<i64>,
    pub unique_id: String,
    pub attributes: VisitorAttributes,
}

impl VisitorUpsert {
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
}
