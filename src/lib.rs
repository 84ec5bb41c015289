pub mod auth;
pub mod config;
pub mod device;
pub mod events;
pub mod geo;
pub mod models;
pub mod session;
pub mod storage;
pub mod tracker;

pub use tracker::{
    track_visits, AuthenticatedUser, RecordOutcome, RecordedVisit, RequestInfo, RouteNames,
    SkipReason, TrackerError, TrackingState, VisitRecorder,
};
