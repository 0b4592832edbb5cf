//! Admin control-plane principal and authentication payloads (§4.8,
//! §3 `AdminPrincipal`). Narrowed to two roles since there is no
//! trading-operation role on this surface.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An admin control-plane account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminPrincipal {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: AdminRole,
    pub created_at: String,
}

/// Roles for the admin control plane (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdminRole {
    #[serde(rename = "admin")]
    Admin, // suspend/resume + full read access
    #[serde(rename = "operator")]
    Operator, // read-only: state, score, events
}

impl AdminRole {
    pub fn as_str(&self) -> &str {
        match self {
            AdminRole::Admin => "admin",
            AdminRole::Operator => "operator",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(AdminRole::Admin),
            "operator" => Some(AdminRole::Operator),
            _ => None,
        }
    }
}

/// JWT claims payload issued to an authenticated admin session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: AdminRole,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: usize,
    pub role: AdminRole,
    pub user: AdminPrincipalResponse,
}

/// Sanitized view of an `AdminPrincipal` (never carries the password hash).
#[derive(Debug, Serialize)]
pub struct AdminPrincipalResponse {
    pub id: String,
    pub username: String,
    pub role: AdminRole,
    pub created_at: String,
}

impl AdminPrincipalResponse {
    pub fn from_principal(principal: &AdminPrincipal) -> Self {
        Self {
            id: principal.id.to_string(),
            username: principal.username.clone(),
            role: principal.role.clone(),
            created_at: principal.created_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let admin = AdminRole::Admin;
        let json = serde_json::to_string(&admin).unwrap();
        assert_eq!(json, r#""admin""#);

        let operator: AdminRole = serde_json::from_str(r#""operator""#).unwrap();
        assert_eq!(operator, AdminRole::Operator);
    }

    #[test]
    fn role_string_conversion_is_case_insensitive() {
        assert_eq!(AdminRole::Admin.as_str(), "admin");
        assert_eq!(AdminRole::Operator.as_str(), "operator");

        assert_eq!(AdminRole::from_str("ADMIN"), Some(AdminRole::Admin));
        assert_eq!(AdminRole::from_str("operator"), Some(AdminRole::Operator));
        assert_eq!(AdminRole::from_str("trader"), None);
    }
}
