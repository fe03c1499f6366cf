use axum::{extract::State, routing::get, Json};

use crate::{context::ServerContext, serialized::ServerTime, Router};

/// Lets clients estimate how far their clock is from the one anchors are measured with
#[utoipa::path(
    get,
    path = "/v1/time",
    tag = "time",
    responses(
        (status = 200, body = ServerTime)
    )
)]
async fn server_time(State(context): State<ServerContext>) -> Json<ServerTime> {
    Json(ServerTime::new(context.collab.context().clock.now()))
}

pub fn router() -> Router {
    Router::new().route("/", get(server_time))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::TestServer;

    #[tokio::test]
    async fn test_reports_the_clock_anchors_use() {
        let server = TestServer::new();
        let expected = server.clock.peek();

        let Json(time) = server_time(State(server.context.clone())).await;

        assert_eq!(serde_json::to_value(time).unwrap(), json!({ "now": expected }));
    }
}
