//! HTTP front-end that registers models, places them on workers and
//! forwards load, train and eval traffic to them.

pub mod error;
pub mod forward;
pub mod handlers;
pub mod metrics;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::{
    create_model, eval_model, get_model, healthz, list_models, list_nodes, model_status,
    on_finished, train_model, upload_model,
};
use crate::metrics::{metrics_handler, track_requests};

pub use crate::error::ApiError;
pub use crate::state::AppState;

pub fn build_app(st: AppState) -> Router {
    let body_limit = st.max_upload_bytes;

    Router::new()
        .route("/healthz", get(healthz))
        .route("/health", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/model", get(list_models).post(create_model))
        .route("/model/:id", get(get_model).post(upload_model))
        .route("/eval/:id", post(eval_model))
        .route("/train", post(train_model))
        .route("/finished", post(on_finished))
        .route("/status/:id", get(model_status))
        .route("/nodes", get(list_nodes))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(st.clone(), track_requests))
        .with_state(st)
}
