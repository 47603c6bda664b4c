//! HTTP control surface for strategy instances.
//!
//! Every request carries the caller in an `X-USER` header:
//! - `GET /` - ids of the caller's instances, one per line
//! - `POST /` - start an instance from a JSON settings body, returns its id
//! - `DELETE /{id}` - stop one instance
//! - `DELETE /` - stop all of the caller's instances

use crate::config::StrategyConfig;
use crate::persistence::StateStore;
use crate::strategy::{InstanceRegistry, Launcher, StopReason};
use anyhow::{Context, Result};
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const USER_HEADER: &str = "X-USER";

/// Shared state of the control surface.
pub struct AppState {
    pub registry: Arc<InstanceRegistry>,
    pub store: Arc<Mutex<StateStore>>,
    pub launcher: Launcher,
}

impl AppState {
    pub fn new(registry: Arc<InstanceRegistry>, store: StateStore, launcher: Launcher) -> Self {
        Self {
            registry,
            store: Arc::new(Mutex::new(store)),
            launcher,
        }
    }

    /// Build and spawn an engine. Its stored settings are dropped once it
    /// completes on its own.
    async fn launch(&self, id: &str, user: &str, config: StrategyConfig) -> Result<()> {
        let token = self.registry.child_token();
        let symbol = config.symbol.clone();
        let engine = self.launcher.build(id, config, token.clone())?;

        let store = self.store.clone();
        let instance_id = id.to_string();
        self.registry
            .insert(id, user, symbol, token, async move {
                let reason = engine.run().await;
                if reason == StopReason::Completed {
                    if let Err(e) = store.lock().await.drop_state(&instance_id) {
                        warn!(id = %instance_id, "Failed to drop finished state: {:#}", e);
                    }
                }
                reason
            })
            .await;
        Ok(())
    }

    /// Spawn every stored instance. Returns how many were resumed.
    pub async fn resume(&self) -> Result<usize> {
        let states = self.store.lock().await.states()?;
        let mut resumed = 0;

        for state in states {
            match self.launch(&state.id, &state.user_id, state.config).await {
                Ok(()) => resumed += 1,
                Err(e) => error!(id = %state.id, "Failed to resume instance: {:#}", e),
            }
        }

        info!(resumed, "Stored instances resumed");
        Ok(resumed)
    }
}

/// Control surface errors, returned as plain status codes.
#[derive(Debug)]
pub enum ApiError {
    Forbidden,
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Forbidden => StatusCode::FORBIDDEN.into_response(),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::Internal(message) => {
                error!("Control surface error: {}", message);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

/// Caller taken from the `X-USER` header.
#[derive(Debug, Clone)]
pub struct User(pub String);

impl<S: Send + Sync> FromRequestParts<S> for User {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| User(value.to_string()))
            .ok_or(ApiError::Forbidden)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(list_instances).post(create_instance).delete(delete_all))
        .route("/{id}", delete(delete_instance))
        .with_state(state)
}

async fn list_instances(
    State(state): State<Arc<AppState>>,
    User(user): User,
) -> Result<String, ApiError> {
    state.registry.reap().await;
    let ids: Vec<String> = state
        .store
        .lock()
        .await
        .user_states(&user)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    Ok(ids.join("\n"))
}

async fn create_instance(
    State(state): State<Arc<AppState>>,
    User(user): User,
    Json(config): Json<StrategyConfig>,
) -> Result<String, ApiError> {
    config
        .clone()
        .with_defaults(state.launcher.defaults())
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let id = state.store.lock().await.create_state(&user, &config)?;

    if let Err(e) = state.launch(&id, &user, config).await {
        state.store.lock().await.drop_state(&id)?;
        return Err(e.into());
    }

    info!(%id, %user, "Instance created");
    Ok(id)
}

async fn delete_instance(
    State(state): State<Arc<AppState>>,
    User(user): User,
    Path(id): Path<String>,
) -> Result<&'static str, ApiError> {
    let owned = state
        .store
        .lock()
        .await
        .user_states(&user)?
        .iter()
        .any(|s| s.id == id);
    if !owned {
        return Err(ApiError::Forbidden);
    }

    state.registry.cancel(&id).await;
    state.store.lock().await.drop_user_state(&user, &id)?;

    info!(%id, %user, "Instance deleted");
    Ok("DONE")
}

async fn delete_all(
    State(state): State<Arc<AppState>>,
    User(user): User,
) -> Result<&'static str, ApiError> {
    let cancelled = state.registry.cancel_owner(&user).await;
    let dropped = state.store.lock().await.drop_user_states(&user)?;

    info!(%user, cancelled = cancelled.len(), dropped, "All instances deleted");
    Ok("DONE")
}

/// Resume stored instances and serve until `shutdown` is cancelled.
pub async fn serve(state: Arc<AppState>, bind: &str, shutdown: CancellationToken) -> Result<()> {
    state.resume().await?;

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Control surface listening on {}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Control surface failed")
}
