//! 監査ミドルウェア（サーバー側インターセプタ）
//!
//! 受信リクエストごとに `AuditContext` を作成してリクエスト拡張へ格納し、
//! セッションの開始から完了・配信までを受け持つ。
//! ヘルスチェック等の除外パスは監査しない。

use crate::capture::{CapturedRequest, CapturedResponse, MAX_CAPTURE_BYTES};
use crate::context::AuditContext;
use crate::dispatch::AuditDispatcher;
use crate::service::AuditService;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use bytes::BytesMut;
use exchange_audit_common::AuditConfig;
use futures::{stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// ミドルウェアの共有状態
#[derive(Clone)]
pub struct AuditState {
    /// ライフサイクルマネージャ
    pub service: Arc<AuditService>,
    /// 完了セッションの配信先
    pub dispatcher: AuditDispatcher,
    config: Arc<AuditConfig>,
}

impl AuditState {
    /// サービス・ディスパッチャ・設定から作成
    pub fn new(service: AuditService, dispatcher: AuditDispatcher, config: AuditConfig) -> Self {
        Self {
            service: Arc::new(service),
            dispatcher,
            config: Arc::new(config),
        }
    }

    /// 設定から作成（アイデンティティはヘッダから解決）
    pub fn from_config(config: &AuditConfig, dispatcher: AuditDispatcher) -> Self {
        Self::new(AuditService::from_config(config), dispatcher, config.clone())
    }

    /// 監査設定
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }
}

/// 監査ミドルウェア
///
/// リクエスト・レスポンスのボディは先頭 `MAX_CAPTURE_BYTES` までを取得し、
/// 残りはそのままハンドラー/クライアントへ流す。
pub async fn audit_middleware(
    State(state): State<AuditState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // 除外判定
    if state.config.is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let ctx = AuditContext::new();
    let (mut parts, body) = request.into_parts();
    let (prefix, body) = buffer_body(body, MAX_CAPTURE_BYTES).await;
    let captured = CapturedRequest::from_parts(&parts, prefix);

    state.service.start_session(&ctx, &captured);
    parts.extensions.insert(ctx.clone());

    // ここから先で中断（キャンセル・パニック）されても必ず完了させる
    let mut guard = CompletionGuard {
        state: state.clone(),
        ctx: ctx.clone(),
        request: captured,
        armed: true,
    };

    let response = next.run(Request::from_parts(parts, body)).await;

    let (parts, body) = response.into_parts();
    let (prefix, body) = buffer_body(body, MAX_CAPTURE_BYTES).await;
    let captured_response =
        CapturedResponse::from_parts(parts.status, parts.headers.clone(), prefix);

    guard.armed = false;
    match state
        .service
        .complete_session(&ctx, &guard.request, &captured_response)
    {
        Ok(session) => {
            trace!(
                url = %session.request_url,
                status = %session.response_status,
                "audit session captured"
            );
            state.dispatcher.dispatch(session);
        }
        Err(e) => error!(error = %e, "Failed to complete audit session"),
    }

    Response::from_parts(parts, body)
}

/// 正常経路を通らずに破棄された場合にセッションを完了させるガード
struct CompletionGuard {
    state: AuditState,
    ctx: AuditContext,
    request: CapturedRequest,
    armed: bool,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.state.service.abandon_session(&self.ctx, &self.request) {
            Ok(session) => {
                debug!(url = %session.request_url, "audit session abandoned before response");
                self.state.dispatcher.dispatch(session);
            }
            Err(e) => error!(error = %e, "Failed to complete abandoned audit session"),
        }
    }
}

/// ボディを `limit` バイトを超えるまで読み、読んだ分を含めて再生可能なボディを返す
///
/// 戻り値の `Bytes` はボディ全体か、`limit` を超えた時点までの先頭部分。
/// 長さが `limit` を超えていれば元のボディは上限より長い。残りは読まずに後続へ流す。
pub(crate) async fn buffer_body(body: Body, limit: usize) -> (Bytes, Body) {
    let mut stream = body.into_data_stream();
    let mut buffered = BytesMut::new();

    while buffered.len() <= limit {
        match stream.next().await {
            Some(Ok(chunk)) => buffered.extend_from_slice(&chunk),
            Some(Err(e)) => {
                debug!(error = %e, "body stream failed while buffering");
                let prefix = buffered.freeze();
                let replay = Body::from_stream(stream::iter([Ok(prefix.clone()), Err(e)]));
                return (prefix, replay);
            }
            None => {
                let bytes = buffered.freeze();
                return (bytes.clone(), Body::from(bytes));
            }
        }
    }

    let prefix = buffered.freeze();
    let captured = prefix.clone();
    let replay = Body::from_stream(stream::once(async move { Ok(prefix) }).chain(stream));
    (captured, replay)
}
