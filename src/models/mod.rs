pub mod api;
pub mod jwt;
pub mod session;
pub mod user;

pub use jwt::{AccessClaims, AuthToken};
pub use session::{HeartbeatStatus, LogoutReason, SessionEvent, SessionId};
pub use user::AuthenticatedUser;
