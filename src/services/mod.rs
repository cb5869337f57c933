pub mod auth_api;
pub mod auth_service;
pub mod heartbeat;
pub mod session_store;

pub use auth_api::AuthApi;
pub use auth_service::AuthService;
pub use session_store::{SessionSnapshot, SessionStore};
