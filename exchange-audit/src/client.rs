//! 監査付きHTTPクライアント（クライアント側インターセプタ）
//!
//! 送信直前にエントリを開始し、レスポンスボディを全てバッファしてからエントリを閉じる。
//! 呼び出し元には未読のレスポンスとして返す。

use crate::capture::{CapturedRequest, CapturedResponse};
use crate::context::AuditContext;
use crate::service::AuditService;
use axum::http;
use exchange_audit_common::AuditError;
use reqwest::{IntoUrl, ResponseBuilderExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// 監査付きクライアントのエラー
#[derive(Debug, Error)]
pub enum ClientError {
    /// 監査ライフサイクル違反（セッション未開始など）
    #[error(transparent)]
    Audit(#[from] AuditError),
    /// 送信・受信エラー（エントリは開いたまま残る）
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// レスポンスの再構築に失敗
    #[error("failed to rebuild response: {0}")]
    Response(#[from] http::Error),
}

/// `reqwest::Client` を包み、外部呼び出しをエントリとして記録する
#[derive(Clone)]
pub struct AuditedClient {
    client: reqwest::Client,
    service: Arc<AuditService>,
}

impl AuditedClient {
    /// クライアントとライフサイクルマネージャを指定して作成
    pub fn new(client: reqwest::Client, service: Arc<AuditService>) -> Self {
        Self { client, service }
    }

    /// 内部のクライアント（リクエスト組み立て用）
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// リクエストを送信する
    pub async fn execute(
        &self,
        ctx: &AuditContext,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, ClientError> {
        self.service
            .start_entry(ctx, &CapturedRequest::from_reqwest(&request))?;

        let response = self.client.execute(request).await?;

        let status = response.status();
        let version = response.version();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        self.service.end_entry(
            ctx,
            &CapturedResponse::from_parts(status, headers.clone(), body.clone()),
        )?;
        debug!(url = %url, status = status.as_u16(), "audited call completed");

        let mut builder = http::Response::builder()
            .status(status)
            .version(version)
            .url(url);
        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }
        Ok(reqwest::Response::from(builder.body(body)?))
    }

    /// GETリクエストを送信する
    pub async fn get(
        &self,
        ctx: &AuditContext,
        url: impl IntoUrl,
    ) -> Result<reqwest::Response, ClientError> {
        let request = self.client.get(url).build()?;
        self.execute(ctx, request).await
    }
}
