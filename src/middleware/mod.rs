pub mod credentials;
pub mod interceptor;

pub use credentials::{attach_credentials, SESSION_ID_HEADER};
pub use interceptor::ApiClient;
