//! Login endpoint for the admin control plane (§4.8). Narrowed from the
//! teacher's `auth::api`: no Privy identity flow, no token-gating, no
//! user CRUD — the admin surface only ever needs a session for its own
//! two roles.

use crate::auth::{
    admin_store::AdminStore,
    jwt::JwtHandler,
    models::{AdminPrincipalResponse, LoginRequest, LoginResponse},
};
use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    pub admin_store: Arc<AdminStore>,
    pub jwt_handler: Arc<JwtHandler>,
}

impl AuthState {
    pub fn new(admin_store: Arc<AdminStore>, jwt_handler: Arc<JwtHandler>) -> Self {
        Self { admin_store, jwt_handler }
    }
}

/// POST /admin/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    info!(username = %payload.username, "admin login attempt");

    let valid = state
        .admin_store
        .verify_password(&payload.username, &payload.password)
        .map_err(|_| AuthApiError::InternalError)?;

    if !valid {
        warn!(username = %payload.username, "failed admin login attempt");
        return Err(AuthApiError::InvalidCredentials);
    }

    let principal = state
        .admin_store
        .get_by_username(&payload.username)
        .map_err(|_| AuthApiError::InternalError)?
        .ok_or(AuthApiError::InvalidCredentials)?;

    let (token, expires_in) = state
        .jwt_handler
        .generate_token(&principal)
        .map_err(|_| AuthApiError::InternalError)?;

    info!(username = %principal.username, role = principal.role.as_str(), "admin login successful");

    Ok(Json(LoginResponse {
        token,
        expires_in,
        role: principal.role.clone(),
        user: AdminPrincipalResponse::from_principal(&principal),
    }))
}

#[derive(Debug)]
pub enum AuthApiError {
    InvalidCredentials,
    InternalError,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid username or password"),
            AuthApiError::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_api_error_responses() {
        let invalid = AuthApiError::InvalidCredentials.into_response();
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);

        let internal = AuthApiError::InternalError.into_response();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
