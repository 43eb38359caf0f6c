use thiserror::Error;

/// Errors surfaced by the store/cache/lock layers.
///
/// Handlers never propagate these directly to clients (see `handlers.rs`) --
/// they are logged and translated into `{ok: false, msg/err: ...}` envelopes.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("no relational store connection available")]
    NoDbConnection,

    #[error("relational store query failed: {0}")]
    DbQuery(String),

    #[error("no kv store connection available")]
    NoKvConnection,

    #[error("kv store is down")]
    KvDown,

    #[error("username or phone already registered")]
    AlreadyRegistered,

    #[error("wrong username or password")]
    WrongCredentials,

    #[error("sms code invalid or expired")]
    BadSmsCode,

    #[error("resend cooldown has not elapsed")]
    SmsCooldown,

    #[error("rate limited")]
    RateLimited,

    #[error("user not found")]
    UserNotFound,

    #[error("encode/decode error: {0}")]
    Codec(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;
