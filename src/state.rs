//! Shared state handed to every handler.

use crate::services::{lifecycle::LifecycleCoordinator, session_store::SessionResolver};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub files: LifecycleCoordinator,
    pub sessions: Arc<dyn SessionResolver>,
    /// Pool handle for readiness probing.
    pub db: Arc<SqlitePool>,
}
