//! HTTP API
//!
//! JSON endpoints for the analysis dashboard plus the map WebSocket.
//! Every handler gets the shared [`AppState`] and the caller's
//! [`SessionHandle`], which the session middleware attaches.

mod auth;
mod cartographie;
mod error;
mod extract;
mod history;
mod home;
mod jobs;
mod previsions;
mod tests_api;
mod upload;
mod visualisation;

pub use error::{AppError, AppResult};
pub use extract::ApiJson;

use crate::auth::{Permission, User, UserStore};
use crate::cache::{build_cache, Cache};
use crate::config::AppConfig;
use crate::jobs::JobStore;
use crate::locations::{LivePositions, LocationStore, PositionBroadcaster};
use crate::session::{session_middleware, SessionHandle, SessionStore};
use crate::stock::StockApiService;
use crate::storage::Database;
use crate::upload::ClamAvScanner;
use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Extension, Router};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const STATIC_CACHE: &str = "public, max-age=31536000";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionStore>,
    pub cache: Arc<dyn Cache>,
    pub stock: Arc<StockApiService>,
    pub users: UserStore,
    pub locations: LocationStore,
    pub jobs: Arc<JobStore>,
    pub live: LivePositions,
    pub broadcaster: PositionBroadcaster,
    pub scanner: Option<Arc<ClamAvScanner>>,
    pub upload_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl AppState {
    /// Open storage, create working directories and wire the services
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let cache = build_cache(&config.cache).await;
        let stock = StockApiService::new(&config.stock_api, cache.clone())
            .context("Failed to build stock API clients")?;
        Self::with_stock(config, cache, stock)
    }

    /// Same as [`AppState::build`] with a prepared stock service
    pub fn with_stock(
        config: AppConfig,
        cache: Arc<dyn Cache>,
        stock: StockApiService,
    ) -> anyhow::Result<Self> {
        let upload_dir = PathBuf::from(&config.upload.dir);
        let models_dir = PathBuf::from(&config.storage.models_dir);
        for dir in [&upload_dir, &models_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let jobs = JobStore::new(&config.storage.jobs_dir).context("Failed to open job store")?;

        let db = Arc::new(
            Database::open(std::path::Path::new(&config.storage.database_path))
                .context("Failed to open database")?,
        );
        let users = UserStore::new(db.clone());
        if let Some(password) = config.auth.admin_password.as_deref().filter(|p| !p.is_empty()) {
            users
                .ensure_default_admin(password, config.security.password_hash_iterations)
                .context("Failed to seed admin account")?;
        }
        let locations = LocationStore::new(db, config.storage.seed_demo_data);

        let sessions = Arc::new(SessionStore::new(
            config.secret_key(),
            &config.security.session_cookie_name,
            config.security.session_lifetime_secs,
            config.security.session_cookie_secure,
        ));
        let scanner = config.upload.clamav_enabled.then(|| {
            Arc::new(ClamAvScanner::new(
                &config.upload.clamav_host,
                config.upload.clamav_port,
            ))
        });

        Ok(Self {
            config: Arc::new(config),
            sessions,
            cache,
            stock: Arc::new(stock),
            users,
            locations,
            jobs: Arc::new(jobs),
            live: LivePositions::new(),
            broadcaster: PositionBroadcaster::default(),
            scanner,
            upload_dir,
            models_dir,
        })
    }

    /// The logged-in, active user of a session
    pub async fn current_user(&self, session: &SessionHandle) -> AppResult<Option<User>> {
        let Some(id) = session.read(|d| d.user_id).await else {
            return Ok(None);
        };
        Ok(self.users.find_by_id(id)?.filter(|u| u.is_active))
    }
}

// ─────────────────────────────────────────────────────────────────
// Access control
// ─────────────────────────────────────────────────────────────────

/// Who may reach a group of routes
#[derive(Debug, Clone, Copy)]
pub enum Access {
    /// Guarded only when `auth.require_login` is on
    Feature(Permission),
    /// Always guarded by the permission
    Always(Permission),
    /// Any logged-in user
    Login,
}

impl Access {
    fn permission(&self) -> Option<Permission> {
        match self {
            Access::Feature(p) | Access::Always(p) => Some(*p),
            Access::Login => None,
        }
    }

    fn enforced(&self, require_login: bool) -> bool {
        match self {
            Access::Feature(_) => require_login,
            Access::Always(_) | Access::Login => true,
        }
    }
}

async fn guard(
    State((state, access)): State<(AppState, Access)>,
    Extension(session): Extension<SessionHandle>,
    req: Request,
    next: Next,
) -> AppResult<Response> {
    if !access.enforced(state.config.auth.require_login) {
        return Ok(next.run(req).await);
    }

    let Some(user) = state.current_user(&session).await? else {
        return Err(AppError::Unauthorized("Authentication required".into()));
    };
    if let Some(permission) = access.permission() {
        if !user.has_permission(permission) {
            warn!(
                "⛔ User '{}' denied {:?} on {}",
                user.username,
                permission,
                req.uri().path()
            );
            return Err(AppError::Forbidden("Insufficient permissions".into()));
        }
    }
    Ok(next.run(req).await)
}

/// Wrap every route of `router` with the access rule
fn guarded(router: Router<AppState>, state: &AppState, access: Access) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state((state.clone(), access), guard))
}

// ─────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────

/// Successful GET responses under /static/ get a long-lived Cache-Control
/// unless the handler set one. Everything else is left alone.
async fn cache_headers(req: Request, next: Next) -> Response {
    let is_static = req.method() == Method::GET && req.uri().path().starts_with("/static/");
    let mut response = next.run(req).await;

    if is_static
        && response.status().is_success()
        && !response.headers().contains_key(CACHE_CONTROL)
    {
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static(STATIC_CACHE));
    }
    response
}

/// Create the application router with all endpoints
pub fn create_router(state: AppState) -> Router {
    use Permission::*;

    let body_limit = state.config.upload.max_content_length;
    let static_dir = state.config.server.static_dir.clone();

    let router = Router::new()
        .merge(home::public_routes())
        .merge(auth::public_routes())
        .merge(guarded(home::routes(), &state, Access::Feature(View)))
        .merge(guarded(upload::read_routes(), &state, Access::Feature(View)))
        .merge(guarded(upload::routes(), &state, Access::Feature(Upload)))
        .merge(guarded(tests_api::read_routes(), &state, Access::Feature(View)))
        .merge(guarded(tests_api::routes(), &state, Access::Feature(Analyze)))
        .merge(guarded(history::read_routes(), &state, Access::Feature(View)))
        .merge(guarded(history::routes(), &state, Access::Feature(Analyze)))
        .merge(guarded(history::export_routes(), &state, Access::Feature(Export)))
        .merge(guarded(previsions::routes(), &state, Access::Feature(Predict)))
        .merge(guarded(previsions::export_routes(), &state, Access::Feature(Export)))
        .merge(guarded(jobs::routes(), &state, Access::Feature(Predict)))
        .merge(guarded(cartographie::routes(), &state, Access::Feature(View)))
        .merge(guarded(visualisation::routes(), &state, Access::Feature(View)))
        .merge(guarded(auth::user_routes(), &state, Access::Login))
        .merge(guarded(auth::admin_routes(), &state, Access::Always(ManageUsers)))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(middleware::from_fn(cache_headers))
        .layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            session_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        // CORS for browser clients
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    router.with_state(state)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🌐 Boursa API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
