//! # mediactl: media upload-and-resolve service for rich-text editors
//!
//! `mediactl` backs an editor's "insert media" modal. The editor opens a session, stages an
//! upload (or picks a file already stored), fills in alt text, title or link text, and
//! confirms. The service then stores the file on a configured disk, measures it when it is
//! an image, and answers with the two events the editor reacts to: `close-modal` and
//! `insert-media` carrying a [`descriptor::MediaDescriptor`].
//!
//! ## Architecture
//!
//! - [`upload`]: the resolver. Picks the storage key (UUID or preserved client name, with a
//!   timestamp suffix on collision), optionally crops and resizes images, probes
//!   dimensions, writes to the disk and returns the public or signed URL.
//! - [`descriptor`]: pure assembly of the media descriptor from the stored file and metadata.
//! - [`session`]: the per-modal state machine (`Idle` / `Editing`) and the session store.
//! - [`storage`]: the [`storage::Disk`] trait and its local, S3 and in-memory backends.
//! - [`probe`] and [`transform`]: image header probing and server-side crop/resize.
//! - [`api`]: the axum HTTP surface under `/api/v1`.
//!
//! Nothing is written to storage before a session is confirmed, so cancelling never
//! leaves orphaned files behind.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML layout and `MEDIACTL_` environment overrides.

pub mod api;
pub mod config;
pub mod descriptor;
pub mod errors;
pub mod probe;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod transform;
pub mod types;
pub mod upload;
pub mod validation;

#[cfg(test)]
pub mod test_utils;

use crate::config::{CorsOrigin, DiskConfig};
use crate::session::SessionStore;
use crate::storage::Disks;
use crate::upload::{ResolverConfig, UploadResolver};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, patch, post},
};
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};

/// Multipart framing allowance on top of the file size limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .resolver(Arc::new(resolver))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub resolver: Arc<UploadResolver>,
    #[builder(default)]
    pub sessions: SessionStore,
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::PATCH])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: session API, static serving for local disks, CORS and
/// request tracing.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let body_limit = usize::try_from(state.config.uploads.max_request_size_kb.saturating_mul(1024))
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let api_routes = Router::new()
        .route("/sessions", post(api::handlers::sessions::create_session))
        .route("/sessions/{id}", get(api::handlers::sessions::get_session))
        .route(
            "/sessions/{id}/file",
            post(api::handlers::sessions::upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/sessions/{id}/existing", post(api::handlers::sessions::select_existing))
        .route("/sessions/{id}/metadata", patch(api::handlers::sessions::update_metadata))
        .route("/sessions/{id}/create", post(api::handlers::sessions::create_media))
        .route("/sessions/{id}/cancel", post(api::handlers::sessions::cancel_session))
        .with_state(state.clone());

    let mut router = Router::new().route("/healthz", get(|| async { "OK" })).nest("/api/v1", api_routes);

    // Local disks can be served directly so their public URLs resolve without a separate web server
    for (name, disk) in &state.config.disks {
        if let DiskConfig::Local {
            root,
            serve_at: Some(mount),
            ..
        } = disk
        {
            info!(disk = %name, mount = %mount, "Serving local disk {:?}", root);
            router = router.nest_service(mount, ServeDir::new(root));
        }
    }

    let cors_layer = create_cors_layer(&state.config)?;
    let router = router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Periodically drop sessions that were opened and then abandoned
fn spawn_session_sweeper(sessions: SessionStore, ttl: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    sessions.purge_expired(ttl);
                }
            }
        }
        debug!("Session sweeper stopped");
    })
}

/// Application lifecycle.
///
/// 1. **Create**: [`Application::new`] builds the disks, the resolver and the router, and
///    starts the session sweeper
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
/// 3. **Shutdown**: when the shutdown future resolves, in-flight requests finish, the
///    sweeper stops and telemetry is flushed
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    shutdown_token: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting mediactl with configuration: {:#?}", config);

        let disks = Disks::from_config(&config.disks).await?;
        let resolver_config = ResolverConfig::try_from(&config.uploads)?;
        let resolver = UploadResolver::new(disks, resolver_config);

        let app_state = AppState::builder().config(config.clone()).resolver(Arc::new(resolver)).build();
        let router = build_router(&app_state)?;

        let shutdown_token = CancellationToken::new();
        let sweeper = spawn_session_sweeper(app_state.sessions.clone(), config.modal.session_ttl, shutdown_token.clone());

        Ok(Self {
            router,
            app_state,
            config,
            shutdown_token,
            sweeper,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, AppState) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.app_state)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("mediactl listening on http://{}, available at http://localhost:{}", bind_addr, self.config.port);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Stopping session sweeper...");
        self.shutdown_token.cancel();
        if let Err(e) = self.sweeper.await {
            tracing::warn!("Session sweeper ended abnormally: {}", e);
        }
        info!(open_sessions = self.app_state.sessions.len(), "Discarding open sessions");

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
