//! Admin control-plane authentication: JWT session issuance over a
//! bcrypt-hashed principal store, narrowed to the two admin roles (§4.8).

pub mod admin_store;
pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;

pub use admin_store::AdminStore;
pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
