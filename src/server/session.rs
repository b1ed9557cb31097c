use axum::Json;
use axum::extract::{Query, State};
use axum_extra::extract::WithRejection;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use log::{debug, error, info, warn};

use super::ServerState;
use super::error::ApiError;
use super::types::{
    CleanupQuery, CleanupResponse, LoginRequest, LoginResponse, MessageResponse,
    UpdatePasswordRequest,
};
use crate::auth::{self, AUTH_COOKIE};
use crate::data::configuration::AuthConfig;
use crate::entity::helpers::sessions;

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn session_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, token))
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::days(config.token_lifetime().num_days()))
        .build()
}

pub(super) async fn login(
    State(state): State<ServerState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let Some(password) = payload.password.filter(|p| !p.is_empty()) else {
        return Err(ApiError::bad_request("Password is required"));
    };
    let db = state.db()?;

    let stored = match sessions::shared_password(db).await? {
        Some(stored) => stored,
        None => {
            let Some(initial) = state.auth.shared_password.clone() else {
                return Err(ApiError::Internal(
                    "no shared password in the database or APP_SHARED_PASSWORD".into(),
                ));
            };
            info!("Initializing the shared password from APP_SHARED_PASSWORD");
            let hash = auth::hash_password(initial, state.auth.bcrypt_cost).await?;
            sessions::init_shared_password(db, hash).await?
        }
    };

    let matches = auth::verify_password(password, stored.password_hash.clone()).await?;
    if !matches {
        warn!("Rejected login with a wrong password");
        return Err(ApiError::unauthorized("Invalid password"));
    }

    let name = present(payload.name);
    let subject = name
        .clone()
        .or_else(|| present(payload.phone))
        .unwrap_or_else(|| String::from("Anonymous user"));
    let (token, claims) = auth::issue_token(
        state.auth.jwt_secret()?,
        &subject,
        state.auth.token_lifetime(),
        auth::password_epoch(&stored),
    )?;

    // The audit row is informational; a failed insert does not block login.
    if let Err(e) = sessions::record_login(
        db,
        claims.jti,
        &subject,
        claims.issued_at(),
        claims.expires_at(),
    )
    .await
    {
        warn!("Could not record login for {subject}: {e}");
    }
    info!("{subject} logged in");

    Ok((
        jar.add(session_cookie(&state.auth, token)),
        Json(LoginResponse {
            message: String::from("Login successful"),
            user: name.unwrap_or_else(|| String::from("Anonymous")),
        }),
    ))
}

async fn forget_token(state: &ServerState, token: &str) -> Result<(), ApiError> {
    let claims = auth::verify_token(state.auth.jwt_secret()?, token)?;
    sessions::forget_login(state.db()?, claims.jti).await?;
    Ok(())
}

pub(super) async fn logout(
    State(state): State<ServerState>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    if let Some(cookie) = jar.get(AUTH_COOKIE) {
        if let Err(e) = forget_token(&state, cookie.value()).await {
            debug!("Logout without a usable session: {e}");
        }
    }
    (
        jar.remove(Cookie::build(AUTH_COOKIE).path("/")),
        Json(MessageResponse::new("Logged out successfully")),
    )
}

pub(super) async fn update_password(
    State(state): State<ServerState>,
    WithRejection(Json(payload), _): WithRejection<Json<UpdatePasswordRequest>, ApiError>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(admin_secret) = present(payload.admin_secret) else {
        return Err(ApiError::Forbidden(
            "Admin access required to change password".into(),
        ));
    };
    if state.auth.admin_secret.as_deref() != Some(admin_secret.as_str()) {
        warn!("Rejected password change with a wrong admin secret");
        return Err(ApiError::unauthorized("Invalid admin secret"));
    }
    let Some(new_password) = present(payload.new_password) else {
        return Err(ApiError::bad_request("New password is required"));
    };

    let hash = auth::hash_password(new_password, state.auth.bcrypt_cost).await?;
    let db = state.db()?;
    sessions::store_shared_password(db, hash).await?;
    match sessions::forget_all_logins(db).await {
        Ok(dropped) => info!("Shared password rotated, {dropped} login record(s) dropped"),
        Err(e) => error!("Shared password rotated but login records were kept: {e}"),
    }
    Ok(Json(MessageResponse::new(
        "Password updated successfully via admin reset",
    )))
}

pub(super) async fn cleanup_sessions(
    State(state): State<ServerState>,
    WithRejection(Query(query), _): WithRejection<Query<CleanupQuery>, ApiError>,
) -> Result<Json<CleanupResponse>, ApiError> {
    if let Some(expected) = &state.auth.session_cleanup_key {
        if query.key.as_deref() != Some(expected.as_str()) {
            warn!("Rejected session cleanup with a wrong key");
            return Err(ApiError::unauthorized("Unauthorized"));
        }
    }

    let db = state.db()?;
    let deleted = sessions::prune_expired_logins(db, Utc::now()).await?;
    info!("Cleaned up {deleted} expired login record(s)");
    Ok(Json(CleanupResponse {
        success: true,
        message: format!("Successfully cleaned up {deleted} expired sessions"),
        deleted_count: deleted,
    }))
}
