use axum::{extract::Request, middleware::Next, response::Response};

pub async fn log_headers_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let has_authorization = request.headers().contains_key("authorization");
    let content_type = request
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
        .to_string();

    tracing::info!(
        method = %method,
        uri = %uri,
        has_authorization,
        content_type,
        "incoming request"
    );

    next.run(request).await
}
