pub mod app;
pub mod domain;
pub mod error;
pub mod infra;
pub mod storage;
pub mod transport;

// Convenience re-exports (keeps call-sites clean)
pub use app::rate_limit::RateLimiter;
pub use app::{Actor, Marketplace};
pub use error::{AppError, AppResult};
pub use infra::config::AppConfig;
