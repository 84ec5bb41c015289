use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One logged request, owned by a visitor.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VisitRecord {
    pub id: i64,
    pub visitor_id: i64,
    pub domain: String,
    pub method: String,
    pub route: Option<String>,
    pub referer: Option<String>,
    pub is_secure: bool,
    pub is_ajax: bool,
    pub path: String,
    pub created_at: i64,
}

/// Request fields for a visit record that has not been written yet.
///
/// The owning visitor id is assigned by the storage layer inside the same
/// transaction that persists the visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVisit {
    pub domain: String,
    pub method: String,
    pub route: Option<String>,
    pub referer: Option<String>,
    pub is_secure: bool,
    pub is_ajax: bool,
    pub path: String,
}
