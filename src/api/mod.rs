pub mod handlers;

pub use handlers::*;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;

use crate::db::BillingStore;

/// 构建全部路由
pub fn router<S: BillingStore>(state: AppState<S>) -> Router {
    let closing_routes = Router::new()
        .route("/api/condominiums/:id/expenses", post(record_expense::<S>))
        .route("/api/condominiums/:id/closings", post(close_month::<S>))
        .route(
            "/api/condominiums/:id/closings/:period/export",
            get(export_closing::<S>),
        )
        .route("/api/closings/batch", post(batch_close::<S>));

    let proration_routes = Router::new()
        .route(
            "/api/condominiums/:id/proration-rules/default",
            post(default_rule::<S>),
        )
        .route("/api/proration-rules/:id/factors", post(compute_factors::<S>));

    let payment_routes = Router::new()
        .route("/api/units/:id/payments", post(register_payment::<S>))
        .route("/api/payments/:id", get(payment_receipt::<S>));

    Router::new()
        .route("/health", get(health_check))
        .merge(closing_routes)
        .merge(proration_routes)
        .merge(payment_routes)
        .layer(ServiceBuilder::new())
        .with_state(state)
}
