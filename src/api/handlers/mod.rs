pub mod google_auth;
pub use self::google_auth::google_auth;

pub mod health;
pub use self::health::health;

pub mod login;
pub use self::login::login;

pub mod root;
pub use self::root::{root, server_public_key};

pub mod signup;
pub use self::signup::signup;

// common types and functions for the handlers
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identifier returned by every successful authentication operation.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserId {
    pub user_id: Uuid,
}

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

#[cfg(test)]
pub(crate) fn unreachable_pool() -> sqlx::PgPool {
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
    use std::time::Duration;

    let options = PgConnectOptions::new()
        .host("127.0.0.1")
        .port(1)
        .username("invalid")
        .database("invalid")
        .ssl_mode(PgSslMode::Disable);
    PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy_with(options)
}
