pub mod extract;
pub mod middleware;
pub mod router;
pub mod types;
pub mod handlers {
    pub mod auth;
    pub mod blockchain;
    pub mod catalog;
    pub mod dashboard;
    pub mod footprints;
    pub mod health;
    pub mod productions;
    pub mod profiles;
    pub mod tokens;
}

pub use router::{create_router, ApiDoc};
pub use types::AppState;
