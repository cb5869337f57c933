use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use super::backend::{spawn_backend, TestBackend};
use crate::config::AuthConfig;
use crate::db::{create_sqlite_storage, MemoryStorage, SqliteStorage};
use crate::models::SessionEvent;
use crate::services::AuthService;

static INIT: Once = Once::new();

/// Initialize logging exactly once
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_max_level(Level::DEBUG)
            .with_span_events(FmtSpan::NONE)
            .init();
    });
}

pub async fn setup_backend() -> TestBackend {
    init_tracing();
    let backend = spawn_backend().await;
    info!(addr = %backend.addr, "Test backend listening");
    backend
}

/// Config pointing at `backend`. The heartbeat interval is long enough that
/// only the immediate first beat fires during a test.
pub fn test_config(backend: &TestBackend) -> AuthConfig {
    AuthConfig::new(backend.base_url())
        .with_heartbeat_interval(Duration::from_secs(3600))
        .with_storage_url("sqlite::memory:")
}

pub fn create_client(config: AuthConfig) -> (AuthService, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let auth = AuthService::new(config, storage.clone()).expect("client builds");
    (auth, storage)
}

pub async fn setup_test_storage() -> SqliteStorage {
    init_tracing();
    create_sqlite_storage("sqlite::memory:")
        .await
        .expect("Failed to create test storage")
}

/// Waits for the first event matching `wanted`, skipping the others.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// Everything already queued on `events`.
pub fn drain_events(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
