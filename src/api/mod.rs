//! 可调用的 RPC 接口：每个操作一个 `POST /rpc/<name>`，JSON 请求与响应

pub mod error;
pub mod extract;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

pub use error::{ApiError, ApiResult};

pub type AppState = Arc<AppContext>;

pub fn build_router(state: AppState) -> Router {
    let rpc = Router::new()
        .route("/objectFinalized", post(handlers::object_finalized))
        .route("/suggestContentMetrics", post(handlers::suggest_content_metrics))
        .route("/generateContent", post(handlers::generate_content))
        .route("/approveContent", post(handlers::approve_content))
        .route("/retryJob", post(handlers::retry_job))
        .route("/listPendingJobs", post(handlers::list_pending_jobs))
        .route("/deleteContentItem", post(handlers::delete_content_item))
        .route("/generateWeaknessBasedTest", post(handlers::generate_weakness_based_test))
        .route("/recordAttempt", post(handlers::record_attempt))
        .route("/generateMCQExplanation", post(handlers::generate_mcq_explanation))
        .route("/generatePerformanceAdvice", post(handlers::generate_performance_advice))
        .route("/getAppData", post(handlers::get_app_data));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/rpc", rpc)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
