//! Visit tracking
//!
//! [`VisitRecorder`] decides whether a request is recorded and, if so,
//! upserts the session's visitor and appends a visit record. The
//! [`middleware::track_visits`] layer drives it for axum routers.

pub mod collect;
pub mod middleware;
pub mod policy;
pub mod recorder;
pub mod request;

pub use middleware::{track_visits, AuthenticatedUser, RouteNames, TrackingState};
pub use policy::SkipReason;
pub use recorder::VisitRecorder;
pub use request::RequestInfo;

use thiserror::Error;

use crate::models::{VisitRecord, Visitor};
use crate::session::SessionError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to persist visit: {0}")]
    Storage(#[from] StorageError),
    #[error("session unavailable: {0}")]
    Session(#[from] SessionError),
}

/// Result of a successful recording.
#[derive(Debug, Clone)]
pub struct RecordedVisit {
    pub visitor: Visitor,
    pub visit: VisitRecord,
    /// The visitor row was created by this request
    pub new_visitor: bool,
}

#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Recorded(Box<RecordedVisit>),
    Skipped(SkipReason),
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded(_))
    }

    pub fn recorded(&self) -> Option<&RecordedVisit> {
        match self {
            RecordOutcome::Recorded(recorded) => Some(recorded),
            RecordOutcome::Skipped(_) => None,
        }
    }
}
