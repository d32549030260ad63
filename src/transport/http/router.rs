use crate::domain::footprint::{
    ActivityData, Emissions, FootprintInput, FootprintUpdate, ReportingPeriod, Scope1, Scope2, Scope3,
};
use crate::domain::production::{ProductionInput, Quality};
use crate::domain::user::Role;
use crate::transport::http::handlers::{
    auth, blockchain, catalog, dashboard, footprints, health, productions, profiles, tokens,
};
use crate::transport::http::middleware::rate_limit;
use crate::transport::http::types::{
    ActiveRequest, ApiResponse, AppState, ChangePasswordRequest, CompensationRequest, LoginRequest,
    PriceRequest, PurchaseRequest, RegisterRequest, RejectRequest, TransferRequest, WalletRequest,
};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthcheck_handler,
        auth::register_handler,
        auth::login_handler,
        auth::me_handler,
        auth::change_password_handler,
        auth::update_wallet_handler,
        auth::logout_handler,
        profiles::get_profile_handler,
        profiles::update_profile_handler,
        profiles::list_mills_handler,
        profiles::list_farmers_handler,
        profiles::get_farmer_handler,
        profiles::list_companies_handler,
        profiles::list_users_handler,
        profiles::user_stats_handler,
        profiles::set_active_handler,
        profiles::verify_email_handler,
        productions::register_production_handler,
        productions::list_productions_handler,
        productions::production_stats_handler,
        productions::get_production_handler,
        productions::validate_production_handler,
        productions::reject_production_handler,
        blockchain::mint_handler,
        blockchain::transfer_handler,
        blockchain::balance_handler,
        blockchain::transactions_handler,
        blockchain::distribute_handler,
        tokens::list_tokens_handler,
        tokens::token_stats_handler,
        tokens::get_token_handler,
        tokens::update_price_handler,
        tokens::retire_token_handler,
        catalog::list_catalog_handler,
        catalog::compensation_handler,
        catalog::purchase_handler,
        catalog::purchase_history_handler,
        footprints::create_footprint_handler,
        footprints::list_footprints_handler,
        footprints::get_footprint_handler,
        footprints::update_footprint_handler,
        footprints::recalculate_footprint_handler,
        footprints::submit_footprint_handler,
        footprints::verify_footprint_handler,
        footprints::publish_footprint_handler,
        footprints::compare_footprint_handler,
        dashboard::dashboard_handler,
        dashboard::general_dashboard_handler
    ),
    components(schemas(
        ApiResponse,
        RegisterRequest,
        LoginRequest,
        ChangePasswordRequest,
        WalletRequest,
        ActiveRequest,
        RejectRequest,
        TransferRequest,
        PriceRequest,
        CompensationRequest,
        PurchaseRequest,
        Role,
        ProductionInput,
        Quality,
        FootprintInput,
        FootprintUpdate,
        ReportingPeriod,
        Emissions,
        Scope1,
        Scope2,
        Scope3,
        ActivityData
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Every marketplace route, nested under `api_prefix` and rate limited.
/// `/health` stays at the root and is not limited.
pub fn create_router(app_state: AppState, api_prefix: &str) -> Router {
    let api = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/password", put(auth::change_password_handler))
        .route("/auth/wallet", put(auth::update_wallet_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route(
            "/profile",
            get(profiles::get_profile_handler).put(profiles::update_profile_handler),
        )
        .route("/mills", get(profiles::list_mills_handler))
        .route("/farmers", get(profiles::list_farmers_handler))
        .route("/farmers/:id", get(profiles::get_farmer_handler))
        .route("/companies", get(profiles::list_companies_handler))
        .route("/users", get(profiles::list_users_handler))
        .route("/users/stats", get(profiles::user_stats_handler))
        .route("/users/:id/active", put(profiles::set_active_handler))
        .route("/users/:id/verify-email", put(profiles::verify_email_handler))
        .route(
            "/productions",
            post(productions::register_production_handler).get(productions::list_productions_handler),
        )
        .route("/productions/stats", get(productions::production_stats_handler))
        .route("/productions/:id", get(productions::get_production_handler))
        .route("/productions/:id/validate", post(productions::validate_production_handler))
        .route("/productions/:id/reject", post(productions::reject_production_handler))
        .route("/blockchain/mint/:production_id", post(blockchain::mint_handler))
        .route("/blockchain/transfer", post(blockchain::transfer_handler))
        .route("/blockchain/balance/:wallet", get(blockchain::balance_handler))
        .route("/blockchain/transactions", get(blockchain::transactions_handler))
        .route("/blockchain/distribute/:token_id", post(blockchain::distribute_handler))
        .route("/tokens", get(tokens::list_tokens_handler))
        .route("/tokens/stats", get(tokens::token_stats_handler))
        .route("/tokens/:id", get(tokens::get_token_handler))
        .route("/tokens/:id/price", put(tokens::update_price_handler))
        .route("/tokens/:id/retire", post(tokens::retire_token_handler))
        .route("/catalog", get(catalog::list_catalog_handler))
        .route("/catalog/compensation", post(catalog::compensation_handler))
        .route("/catalog/purchase", post(catalog::purchase_handler))
        .route("/catalog/purchases", get(catalog::purchase_history_handler))
        .route(
            "/footprints",
            post(footprints::create_footprint_handler).get(footprints::list_footprints_handler),
        )
        .route(
            "/footprints/:id",
            get(footprints::get_footprint_handler).put(footprints::update_footprint_handler),
        )
        .route("/footprints/:id/recalculate", post(footprints::recalculate_footprint_handler))
        .route("/footprints/:id/submit", post(footprints::submit_footprint_handler))
        .route("/footprints/:id/verify", post(footprints::verify_footprint_handler))
        .route("/footprints/:id/publish", post(footprints::publish_footprint_handler))
        .route("/footprints/:id/comparison", get(footprints::compare_footprint_handler))
        .route("/dashboard", get(dashboard::dashboard_handler))
        .route("/dashboard/general", get(dashboard::general_dashboard_handler))
        .layer(axum::middleware::from_fn_with_state(app_state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health::healthcheck_handler))
        .nest(api_prefix, api)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
