//! Application Startup
//!
//! Application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;

use crate::config::Settings;
use crate::infrastructure::database::{self, PgChatStore};
use crate::presentation::http::routes;
use crate::presentation::websocket::handler::spawn_throttle_sweep;
use crate::presentation::websocket::{ConnectionRegistry, EventRouter};
use crate::shared::snowflake::SnowflakeGenerator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub store: Arc<PgChatStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<EventRouter<PgChatStore>>,
    pub settings: Arc<Settings>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let db = database::create_pool(&settings.database).await?;
        tracing::info!("Database connection pool created");

        database::run_migrations(&db).await?;
        tracing::info!("Migrations applied");

        let store = Arc::new(PgChatStore::new(db.clone()));

        let snowflake = Arc::new(SnowflakeGenerator::new(
            settings.snowflake.machine_id as u64,
            settings.snowflake.node_id as u64,
        ));

        let registry = Arc::new(ConnectionRegistry::new(
            settings.websocket.max_connections_per_user,
        ));

        let event_router = Arc::new(EventRouter::new(
            store.clone(),
            registry.clone(),
            snowflake,
            settings.throttle.clone(),
        ));
        spawn_throttle_sweep(event_router.clone());

        crate::presentation::http::handlers::health::init_server_start();

        let state = AppState {
            db,
            store,
            registry,
            router: event_router,
            settings: Arc::new(settings.clone()),
        };

        let router = routes::create_router(state);

        let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
            .parse()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self { listener, router })
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
