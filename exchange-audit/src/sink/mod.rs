//! 監査セッションの配信先（シンク）
//!
//! - `QueueAuditSink`: メッセージキューへ発行
//! - `IndexAuditSink`: ドキュメントストアの `{identity}-audit` インデックスへ書き込み
//!
//! 配信失敗はシンク内で完結させる（ログ出力のみ、再送なし）。
//! 元のリクエストは既に完了しているため、呼び出し元へは伝播しない。

/// ドキュメントインデックスシンク
pub mod index;
/// メッセージキューシンク
pub mod queue;

pub use index::{DocumentStore, HttpDocumentStore, IndexAuditSink, StoreError};
pub use queue::{HttpQueueClient, QueueAuditSink, QueueClient, QueueError, QueueMessage};

use async_trait::async_trait;
use exchange_audit_common::{AuditConfig, AuditError, AuditSession, SinkConfig, SinkKind, SinkError};
use std::sync::Arc;
use tracing::info;

/// ログに出力するセッション表現の最大文字数
pub const LOG_TRUNCATE_CHARS: usize = 1024;

/// 完了したセッションの配信先
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// セッションを配信する
    ///
    /// `Err` を返すのはシンク固有の前提条件違反のみ。
    async fn send(&self, session: AuditSession) -> Result<(), SinkError>;
}

/// ログ出力用にセッションを文字数上限付きで文字列化する
pub fn truncated(session: &AuditSession) -> String {
    let rendered = serialize(session);
    let total = rendered.chars().count();
    if total <= LOG_TRUNCATE_CHARS {
        return rendered;
    }
    let head: String = rendered.chars().take(LOG_TRUNCATE_CHARS).collect();
    format!("{head}... (truncated from {total} characters)")
}

fn serialize(session: &AuditSession) -> String {
    serde_json::to_string(session).unwrap_or_else(|e| format!("<unserializable session: {e}>"))
}

fn http_client(config: &SinkConfig) -> Result<reqwest::Client, AuditError> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| AuditError::Config(format!("failed to build HTTP client: {e}")))
}

fn required(value: Option<&str>, name: &str) -> Result<String, AuditError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AuditError::Config(format!("{name} is required for the configured sink")))
}

/// 設定からシンクを構築する（起動時に一度だけ）
pub fn build_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>, AuditError> {
    let sink = &config.sink;
    match sink.kind {
        SinkKind::Queue => {
            let queue_url = required(sink.queue_url.as_deref(), "queue_url")?;
            info!(queue_url = %queue_url, "Audit sink: message queue");
            let client = HttpQueueClient::new(http_client(sink)?);
            Ok(Arc::new(QueueAuditSink::new(
                Arc::new(client),
                queue_url,
                config.service_name.clone(),
            )))
        }
        SinkKind::Index => {
            let endpoint = required(sink.index_endpoint.as_deref(), "index_endpoint")?;
            info!(endpoint = %endpoint, "Audit sink: document index");
            let store = HttpDocumentStore::new(http_client(sink)?, endpoint);
            Ok(Arc::new(IndexAuditSink::new(
                Arc::new(store),
                config.service_name.clone(),
            )))
        }
    }
}
