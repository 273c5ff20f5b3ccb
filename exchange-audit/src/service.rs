//! 監査セッションのライフサイクル管理
//!
//! コンテキストごとの状態遷移:
//! `Idle → SessionOpen → (SessionOpen + EntryOpen)* → Idle`
//!
//! - 取り残された状態（未クローズのセッション/エントリ）は警告ログを出して破棄する
//! - 対応する状態が無い操作は `AuditError` として呼び出し元へ返す

use crate::capture::{body_text, header, headers_text, CapturedRequest, CapturedResponse};
use crate::context::AuditContext;
use crate::identity::{HeaderIdentity, IdentityResolver};
use chrono::Utc;
use exchange_audit_common::{
    properties, AuditConfig, AuditEntry, AuditError, AuditSession, OperationType, UNKNOWN,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// 監査ライフサイクルマネージャ
#[derive(Clone)]
pub struct AuditService {
    identity: Arc<dyn IdentityResolver>,
    forwarded_header: String,
}

impl AuditService {
    /// アイデンティティ解決器と転送ヘッダ名を指定して作成
    pub fn new(identity: Arc<dyn IdentityResolver>, forwarded_header: impl Into<String>) -> Self {
        Self {
            identity,
            forwarded_header: forwarded_header.into(),
        }
    }

    /// 設定から作成（アイデンティティはヘッダから解決）
    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(
            Arc::new(HeaderIdentity::new(config.identity_header.clone())),
            config.forwarded_header.clone(),
        )
    }

    /// セッションを開始する
    pub fn start_session(&self, ctx: &AuditContext, request: &CapturedRequest) {
        if let Some(stale) = ctx.clear_session() {
            warn!(
                stale_url = %stale.request_url,
                stale_entries = stale.entries.len(),
                "Unclosed audit session discarded"
            );
        }

        let supplier_id = self
            .identity
            .resolve(request)
            .unwrap_or_else(|| UNKNOWN.to_string());

        let mut session = AuditSession::new(Utc::now());
        session.request_url = request.url.clone();
        session.request_method = request.method.to_string();
        session.request_headers = headers_text(request);
        session.request_origin = self.request_origin(request);
        session
            .additional_properties
            .insert(properties::SUPPLIER_ID.to_string(), supplier_id);

        debug!(url = %session.request_url, method = %session.request_method, "audit session started");
        ctx.set_session(session);
    }

    /// 送信元を解決する: 転送ヘッダ → 接続元ホスト → 番兵値
    fn request_origin(&self, request: &CapturedRequest) -> String {
        header(request, &self.forwarded_header)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| {
                request
                    .remote_host
                    .as_deref()
                    .map(str::trim)
                    .filter(|host| !host.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// 外部呼び出しのエントリを開始する
    pub fn start_entry(
        &self,
        ctx: &AuditContext,
        request: &CapturedRequest,
    ) -> Result<(), AuditError> {
        if !ctx.has_session() {
            return Err(AuditError::NoOpenSession);
        }

        if let Some(stale) = ctx.clear_entry() {
            warn!(entry_index = stale.index(), "Unclosed audit entry discarded");
        }

        let mut entry = AuditEntry::new(Utc::now());
        entry.request_url = request.url.clone();
        entry.request_method = request.method.to_string();
        entry.request_headers = headers_text(request);
        entry.request_body = body_text(request, &request.url);

        let entry = ctx.attach_entry(entry).ok_or(AuditError::NoOpenSession)?;
        ctx.set_entry(entry);
        Ok(())
    }

    /// 外部呼び出しのエントリをレスポンスで閉じる
    pub fn end_entry(
        &self,
        ctx: &AuditContext,
        response: &CapturedResponse,
    ) -> Result<(), AuditError> {
        ctx.with_entry(|entry| {
            entry.response_status = response.status.as_u16().to_string();
            entry.response_headers = headers_text(response);
            entry.response_body = body_text(response, &entry.request_url);
        })
        .ok_or(AuditError::NoOpenEntry)?;

        ctx.clear_entry();
        Ok(())
    }

    /// セッションを完了し、配信用に取り出す
    ///
    /// 取得処理の成否にかかわらず、コンテキストのセッションは必ずクリアされる。
    pub fn complete_session(
        &self,
        ctx: &AuditContext,
        request: &CapturedRequest,
        response: &CapturedResponse,
    ) -> Result<AuditSession, AuditError> {
        self.finish(ctx, request, Some(response))
    }

    /// レスポンスを得られなかったセッションを完了する（キャンセル・パニック時）
    ///
    /// レスポンス系フィールドは空文字列のまま残る。
    pub fn abandon_session(
        &self,
        ctx: &AuditContext,
        request: &CapturedRequest,
    ) -> Result<AuditSession, AuditError> {
        self.finish(ctx, request, None)
    }

    fn finish(
        &self,
        ctx: &AuditContext,
        request: &CapturedRequest,
        response: Option<&CapturedResponse>,
    ) -> Result<AuditSession, AuditError> {
        if !ctx.has_session() {
            return Err(AuditError::NoOpenSession);
        }
        if let Some(stale) = ctx.clear_entry() {
            warn!(entry_index = stale.index(), "Unclosed audit entry discarded");
        }

        // 先にコンテキストから取り外すので、以降の処理で何が起きても状態は残らない
        let mut session = ctx.clear_session().ok_or(AuditError::NoOpenSession)?;

        session.request_body = body_text(request, &request.url);
        if let Some(response) = response {
            session.response_status = response.status.as_u16().to_string();
            session.response_headers = headers_text(response);
            session.response_body = body_text(response, &session.request_url);
        }

        debug!(
            url = %session.request_url,
            status = %session.response_status,
            entries = session.entries.len(),
            "audit session completed"
        );
        Ok(session)
    }

    /// 追加プロパティを設定する（上書き）
    pub fn add_property(
        &self,
        ctx: &AuditContext,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), AuditError> {
        if key.is_empty() {
            return Err(AuditError::EmptyPropertyKey);
        }
        let value = value.into();
        ctx.with_session(|session| {
            session
                .additional_properties
                .insert(key.to_string(), value);
        })
        .ok_or(AuditError::NoOpenSession)
    }

    /// 操作種別を記録する
    pub fn add_operation(
        &self,
        ctx: &AuditContext,
        operation: OperationType,
    ) -> Result<(), AuditError> {
        self.add_property(ctx, properties::OPERATION_TYPE, operation.name())
    }
}
