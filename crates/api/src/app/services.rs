use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use stockroom_events::{EventEnvelope, InMemoryEventBus};
use stockroom_infra::{
    config::ServerConfig,
    event_store::{EventStore, InMemoryEventStore, PostgresEventStore},
    external::{CatalogAlternativeResolver, InMemoryStaffNotifier},
    fulfillment::Fulfillment,
    projections::ReadModels,
};

pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// The fulfillment service over whichever store the process was configured with.
pub type Service = Fulfillment<Arc<dyn EventStore>, Bus>;

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub fulfillment: Service,
    /// Staff notifications are kept in memory and read back by the staff UI.
    pub notifications: Arc<InMemoryStaffNotifier>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices").finish_non_exhaustive()
    }
}

/// Wire the event store (Postgres when `DATABASE_URL` is set), bus, read
/// models and collaborators, then rebuild the read models from the log.
pub async fn build_services(config: &ServerConfig) -> anyhow::Result<AppServices> {
    let store: Arc<dyn EventStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("failed to connect to the event store database")?;
            let store = PostgresEventStore::new(pool);
            store.migrate().await.context("event store migration failed")?;
            tracing::info!("using postgres event store");
            Arc::new(store)
        }
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
    };

    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let read_models = Arc::new(ReadModels::new());
    let resolver = Arc::new(CatalogAlternativeResolver::new(read_models.clone()));
    let notifications = Arc::new(InMemoryStaffNotifier::new());

    let fulfillment = Fulfillment::new(
        store,
        bus.clone(),
        read_models,
        notifications.clone(),
        resolver,
        config.fulfillment.clone(),
    );

    let replayed = fulfillment
        .rebuild_read_models()
        .context("failed to rebuild read models")?;
    tracing::info!(replayed, "read models ready");

    Ok(AppServices {
        fulfillment,
        notifications,
    })
}
