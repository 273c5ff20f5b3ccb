//! serve サブコマンド
//!
//! 監査ミドルウェア付きの中継サーバーを構成する。
//! `/relay/*path` への要求を上流へGETで中継し、その呼び出しをエントリとして記録する。

use crate::client::AuditedClient;
use crate::context::AuditContext;
use crate::middleware::{audit_middleware, AuditState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{any, get},
    Extension, Router,
};
use clap::Args;
use exchange_audit_common::properties;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// インタラクションIDを受け取るリクエストヘッダ
pub const INTERACTION_ID_HEADER: &str = "x-interaction-id";

/// serve サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Listen port
    #[arg(short, long, default_value = "8080", env = "EXCHANGE_AUDIT_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "EXCHANGE_AUDIT_HOST")]
    pub host: String,

    /// Upstream base URL that /relay requests are forwarded to
    #[arg(
        short,
        long,
        default_value = "http://localhost:8081",
        env = "EXCHANGE_AUDIT_UPSTREAM"
    )]
    pub upstream: String,
}

#[derive(Clone)]
struct RelayState {
    audit: AuditState,
    client: AuditedClient,
    upstream: String,
}

/// 中継サーバーのルーターを構築する
pub fn router(audit: AuditState, http: reqwest::Client, upstream: impl Into<String>) -> Router {
    let relay = RelayState {
        client: AuditedClient::new(http, audit.service.clone()),
        audit: audit.clone(),
        upstream: upstream.into().trim_end_matches('/').to_string(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/relay/*path", any(relay_handler))
        .with_state(relay)
        .layer(from_fn_with_state(audit, audit_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn relay_handler(
    State(state): State<RelayState>,
    Extension(ctx): Extension<AuditContext>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(interaction_id) = headers
        .get(INTERACTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
    {
        if let Err(e) =
            state
                .audit
                .service
                .add_property(&ctx, properties::INTERACTION_ID, interaction_id.trim())
        {
            warn!(error = %e, "Failed to record interaction id");
        }
    }

    let url = format!("{}/{}", state.upstream, path.trim_start_matches('/'));
    let upstream = match state.client.get(&ctx, &url).await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "Upstream call failed");
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    let status = upstream.status();
    let content_type = upstream.headers().get(CONTENT_TYPE).cloned();
    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}
