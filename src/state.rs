//! Shared application state handed to control-plane handlers.
//!
//! Every dependency is explicit; tests construct an `AppState` from fakes
//! without touching process-wide state.

use crate::data::jobs::JobQueue;
use crate::scraper::detector::MissingDataDetector;
use crate::scraper::scheduler::Scheduler;
use crate::scraper::sources::{RetailImporter, ScraperSet, SourceContext};
use crate::status::ServiceStatusRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub queue: JobQueue,
    pub scheduler: Arc<Scheduler>,
    pub detector: Arc<MissingDataDetector>,
    pub retail: Arc<RetailImporter>,
    pub scrapers: Arc<ScraperSet>,
    pub ctx: Arc<SourceContext>,
    pub statuses: ServiceStatusRegistry,
}
