use std::sync::Arc;
use tracing::{debug, info, warn};

use super::collect::{collect, Enrichment};
use super::policy::skip_reason;
use super::{RecordOutcome, RecordedVisit, RequestInfo, TrackerError};
use crate::config::TrackerConfig;
use crate::device::UserAgentParser;
use crate::events::{NewVisitorEvent, VisitorEventSink};
use crate::geo::GeoIpService;
use crate::models::{NewVisit, Visitor, VisitorUpsert};
use crate::session::SessionContext;
use crate::storage::{Storage, StorageError};

/// Records visits for one application.
///
/// All collaborators are injected: the tracking rules, the visitor store,
/// the user-agent parser and the sink for new-visitor events.
pub struct VisitRecorder {
    config: TrackerConfig,
    storage: Arc<dyn Storage>,
    parser: Arc<dyn UserAgentParser>,
    events: Arc<dyn VisitorEventSink>,
    enrichment: Enrichment,
}

impl VisitRecorder {
    pub fn new(
        config: TrackerConfig,
        storage: Arc<dyn Storage>,
        parser: Arc<dyn UserAgentParser>,
        events: Arc<dyn VisitorEventSink>,
    ) -> Self {
        let enrichment = Enrichment {
            geoip: None,
            browser_language: config.collect_browser_language,
        };

        Self {
            config,
            storage,
            parser,
            events,
            enrichment,
        }
    }

    /// Fill the location columns from a GeoIP database.
    pub fn with_geoip(mut self, geoip: GeoIpService) -> Self {
        self.enrichment.geoip = Some(geoip);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Record the request for the session's visitor.
    ///
    /// Returns [`RecordOutcome::Skipped`] when a tracking rule excludes the
    /// request; nothing is read or written in that case. Storage failures and
    /// failures to read the session are returned as errors and leave no
    /// partial rows behind. Failing to write the visitor id back to the
    /// session after the rows are committed is logged, and the visit still
    /// counts as recorded.
    pub async fn record_visit(
        &self,
        request: &RequestInfo,
        session: &SessionContext,
    ) -> Result<RecordOutcome, TrackerError> {
        if let Some(reason) = skip_reason(&self.config, request) {
            debug!(
                route = request.route_name.as_deref().unwrap_or(""),
                method = %request.method,
                %reason,
                "visit not recorded"
            );
            return Ok(RecordOutcome::Skipped(reason));
        }

        let existing = self.resolve_visitor(session).await?;
        let attributes = collect(request, self.parser.as_ref(), &self.enrichment);

        let upsert = match existing {
            Some(visitor) => VisitorUpsert {
                id: Some(visitor.id),
                unique_id: visitor.unique_id,
                attributes,
            },
            None => VisitorUpsert {
                id: None,
                unique_id: new_unique_id(),
                attributes,
            },
        };

        let new_visit = new_visit(request);
        self.announce(&upsert).await;

        let stored = self.storage.record_visit(&upsert, &new_visit).await;
        let (visitor, visit, new_visitor) = match stored {
            Ok((visitor, visit)) => (visitor, visit, upsert.is_new()),
            Err(StorageError::VisitorNotFound(missing)) => {
                // Row deleted after it was read, possibly served from cache
                warn!(
                    session_id = session.id(),
                    visitor_id = missing,
                    "visitor vanished before the update, starting a new one"
                );
                let upsert = VisitorUpsert {
                    id: None,
                    unique_id: new_unique_id(),
                    attributes: upsert.attributes,
                };
                self.announce(&upsert).await;
                let (visitor, visit) = self.storage.record_visit(&upsert, &new_visit).await?;
                (visitor, visit, true)
            }
            Err(err) => return Err(err.into()),
        };

        // The rows are committed at this point; a session failure only
        // costs the visitor binding for the next request
        if let Err(err) = session.set_visitor_id(visitor.id).await {
            warn!(
                session_id = session.id(),
                visitor_id = visitor.id,
                error = %err,
                "visit recorded but the session could not be updated"
            );
        }

        if new_visitor {
            info!(
                visitor_id = visitor.id,
                unique_id = %visitor.unique_id,
                "new visitor recorded"
            );
        }
        debug!(
            visitor_id = visitor.id,
            visit_id = visit.id,
            route = visit.route.as_deref().unwrap_or(""),
            method = %visit.method,
            "visit recorded"
        );

        Ok(RecordOutcome::Recorded(Box::new(RecordedVisit {
            visitor,
            visit,
            new_visitor,
        })))
    }

    /// Emit the new-visitor event for a visitor without a row yet.
    async fn announce(&self, upsert: &VisitorUpsert) {
        if upsert.is_new() && self.config.events.dispatch {
            self.events.new_visitor(NewVisitorEvent::new(upsert)).await;
        }
    }

    /// The visitor bound to the session, if its row still exists.
    async fn resolve_visitor(
        &self,
        session: &SessionContext,
    ) -> Result<Option<Visitor>, TrackerError> {
        let Some(visitor_id) = session.visitor_id().await? else {
            return Ok(None);
        };

        let visitor = self.storage.find_visitor(visitor_id).await?;
        if visitor.is_none() {
            warn!(
                session_id = session.id(),
                visitor_id, "session references a missing visitor, starting a new one"
            );
        }

        Ok(visitor)
    }
}

fn new_visit(request: &RequestInfo) -> NewVisit {
    NewVisit {
        domain: request.host.clone(),
        method: request.method.to_ascii_uppercase(),
        route: request.route_name.clone(),
        referer: request.referer.clone(),
        is_secure: request.is_secure,
        is_ajax: request.is_ajax,
        path: request.path.clone(),
    }
}

fn new_unique_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
