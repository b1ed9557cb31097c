use crate::auth::{self, AUTH_COOKIE};
use crate::data::configuration::{AuthConfig, Configuration};
use crate::data::dbconnector::{KTDBConnection, SQLConnector};
use crate::entity::helpers::sessions;
use crate::layout::LayoutOptions;
pub(crate) mod error;
mod persons;
mod relationships;
mod session;
pub(crate) mod types;
use anyhow::Context;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    Router,
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use error::ApiError;
use log::{debug, info};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

#[derive(Clone)]
pub struct ServerState {
    pub database_connection: Arc<SQLConnector>,
    pub auth: Arc<AuthConfig>,
    pub layout: Arc<LayoutOptions>,
}

impl ServerState {
    pub fn new(config: &Configuration, database_connection: SQLConnector) -> Self {
        ServerState {
            database_connection: Arc::new(database_connection),
            auth: Arc::new(config.auth.clone()),
            layout: Arc::new(config.layout.clone()),
        }
    }

    pub fn db(&self) -> Result<&DatabaseConnection, ApiError> {
        Ok(self.database_connection.connection()?)
    }
}

pub fn build_router(state: ServerState) -> Router {
    let family = Router::new()
        .route(
            "/api/persons",
            get(persons::list_persons).post(persons::create_person),
        )
        .route(
            "/api/persons/{id}",
            get(persons::get_person)
                .put(persons::update_person)
                .delete(persons::delete_person),
        )
        .route(
            "/api/relationships/all",
            get(relationships::list_relationships)
                .post(relationships::create_relationship)
                .put(relationships::update_relationship)
                .delete(relationships::delete_relationship),
        )
        .route(
            "/api/relationships/{person_id}",
            get(relationships::relationships_of_person),
        )
        .route("/api/tree", get(relationships::family_tree))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/api/login", post(session::login))
        .route("/api/logout", post(session::logout))
        .route("/api/update-password", post(session::update_password))
        .route(
            "/api/cleanup-sessions",
            get(session::cleanup_sessions).post(session::cleanup_sessions),
        )
        .merge(family)
        .with_state(state)
}

/// Lets a request through when its cookie carries a valid token issued
/// against the current shared password.
async fn require_session(
    State(state): State<ServerState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = jar.get(AUTH_COOKIE).map(|c| c.value().to_string()) else {
        return Err(ApiError::unauthorized("Not authenticated"));
    };
    let claims = auth::verify_token(state.auth.jwt_secret()?, &token).map_err(|e| {
        debug!("Rejected session token: {e}");
        ApiError::unauthorized("Invalid or expired token")
    })?;

    let current = sessions::shared_password(state.db()?).await?;
    if current.as_ref().map(auth::password_epoch) != Some(claims.password_epoch) {
        debug!("Token {} predates the current shared password", claims.jti);
        return Err(ApiError::unauthorized("Invalid or expired token"));
    }

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Could not listen for shutdown: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

pub async fn run(
    config: Configuration,
    database_connection: SQLConnector,
    port: u16,
) -> anyhow::Result<()> {
    config
        .auth
        .jwt_secret()
        .context("refusing to serve without a JWT secret")?;
    debug!("Starting server on port {}", port);

    let state = ServerState::new(&config, database_connection);
    let shared_db = state.database_connection.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shared_db.close().await
}

#[cfg(test)]
mod tests;
