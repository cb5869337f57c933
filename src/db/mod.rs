use async_trait::async_trait;

use crate::error::StorageError;

pub mod memory;
pub mod sqlite;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Keys of the persisted client state.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const USER: &str = "user";
    pub const SESSION_ID: &str = "session_id";
    pub const AUTHENTICATED: &str = "is_authenticated";

    pub const LANGUAGE: &str = "language";
    pub const THEME_COLORS: &str = "theme_colors";
    pub const DARK_MODE: &str = "dark_mode";

    /// Everything removed on logout. UI preferences go with the session.
    pub const CLEARED_ON_LOGOUT: [&str; 7] = [
        ACCESS_TOKEN,
        USER,
        SESSION_ID,
        AUTHENTICATED,
        LANGUAGE,
        THEME_COLORS,
        DARK_MODE,
    ];
}

/// A string key/value store standing in for browser local storage.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub async fn create_sqlite_storage(url: &str) -> Result<SqliteStorage, StorageError> {
    SqliteStorage::connect(url).await
}
