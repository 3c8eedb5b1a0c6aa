use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::database::Database;
use crate::messages;

async fn index() -> &'static str {
    "mailroom"
}

pub fn router(db: Database) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/data", post(messages::submit).get(messages::list))
        .layer(TraceLayer::new_for_http())
        .with_state(db)
}
