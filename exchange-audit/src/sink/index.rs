//! ドキュメントインデックスシンク
//!
//! ストアに到達できない環境（ローカル/オフライン）でも動くよう、
//! 書き込み失敗時はセッションをローカルログへ出力して終える。

use super::AuditSink;
use async_trait::async_trait;
use chrono::Utc;
use exchange_audit_common::{AuditSession, SinkError};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// メタデータ: 書き込みごとのリクエストID
pub const REQUEST_ID_FIELD: &str = "requestId";
/// メタデータ: 書き込み時刻
pub const TIMESTAMP_FIELD: &str = "@timestamp";
/// メタデータ: 所有サービス名
pub const OWNER_FIELD: &str = "@owner";

/// インデックス名のサフィックス
const INDEX_SUFFIX: &str = "-audit";

/// インデックス名に使えない文字
const INVALID_INDEX_CHARS: &[char] = &['/', '\\', '?', '#', '*', '"', '<', '>', '|', ',', ':'];

/// インデックス名の最大バイト数
const MAX_INDEX_NAME_BYTES: usize = 255;

/// ドキュメントストアエラー
#[derive(Debug, Error)]
pub enum StoreError {
    /// 接続不可・送受信エラー
    #[error("document store unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),
    /// ストアが拒否した
    #[error("document store rejected document: HTTP {status}")]
    Rejected {
        /// HTTPステータス
        status: u16,
        /// レスポンスボディ
        body: String,
    },
    /// ドキュメント化に失敗
    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// エンドポイントからURLを組み立てられない
    #[error("invalid document store endpoint: {0}")]
    InvalidEndpoint(String),
}

/// ドキュメントストアクライアント
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// ドキュメントを指定インデックスへ書き込む
    async fn index(&self, index: &str, document: &Map<String, Value>) -> Result<(), StoreError>;
}

/// `{endpoint}/{index}/_doc` へPOSTするクライアント
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpDocumentStore {
    /// reqwestクライアントとエンドポイントを指定して作成
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self { http, endpoint }
    }

    /// `{endpoint}/{index}/_doc`（インデックス名は1セグメントとしてエンコードする）
    fn document_url(&self, index: &str) -> Result<reqwest::Url, StoreError> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| StoreError::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidEndpoint(self.endpoint.clone()))?
            .pop_if_empty()
            .push(index)
            .push("_doc");
        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn index(&self, index: &str, document: &Map<String, Value>) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.document_url(index)?)
            .json(document)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// アイデンティティごとのインデックスへ書き込むシンク
pub struct IndexAuditSink {
    store: Arc<dyn DocumentStore>,
    service_name: String,
}

impl IndexAuditSink {
    /// ストアと所有サービス名を指定して作成
    pub fn new(store: Arc<dyn DocumentStore>, service_name: impl Into<String>) -> Self {
        Self {
            store,
            service_name: service_name.into(),
        }
    }

    /// セッションとメタデータを1ドキュメントにまとめる
    fn document(&self, session: &AuditSession) -> Result<Map<String, Value>, StoreError> {
        let mut document = match serde_json::to_value(session)? {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("session".to_string(), other);
                map
            }
        };

        let mut metadata = Map::new();
        metadata.insert(
            REQUEST_ID_FIELD.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
        metadata.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        metadata.insert(
            OWNER_FIELD.to_string(),
            Value::String(self.service_name.clone()),
        );
        merge_metadata(&mut document, metadata);
        Ok(document)
    }
}

/// メタデータをドキュメントへマージする（既存キーの値が優先）
fn merge_metadata(document: &mut Map<String, Value>, metadata: Map<String, Value>) {
    for (key, value) in metadata {
        document.entry(key).or_insert(value);
    }
}

/// インデックス名 `{identity}-audit`
///
/// インデックス名として使えないアイデンティティ（大文字・空白・区切り文字を含む、
/// `-` `_` `+` `.` で始まる）は `None`。
pub fn index_name(identity: &str) -> Option<String> {
    let valid = !identity.is_empty()
        && !identity.starts_with(['-', '_', '+', '.'])
        && !identity.chars().any(|c| {
            c.is_uppercase() || c.is_whitespace() || c.is_control() || INVALID_INDEX_CHARS.contains(&c)
        });
    let index = format!("{identity}{INDEX_SUFFIX}");
    (valid && index.len() <= MAX_INDEX_NAME_BYTES).then_some(index)
}

#[async_trait]
impl AuditSink for IndexAuditSink {
    async fn send(&self, session: AuditSession) -> Result<(), SinkError> {
        let identity = session.identity().ok_or(SinkError::MissingIdentity)?;

        let document = match self.document(&session) {
            Ok(document) => document,
            Err(e) => {
                error!(error = %e, "Failed to build audit document");
                return Ok(());
            }
        };

        let Some(index) = index_name(identity) else {
            warn!(
                identity = %identity,
                "Audit identity is not a valid index name: {}",
                serde_json::to_string(&document).unwrap_or_default()
            );
            return Ok(());
        };

        match self.store.index(&index, &document).await {
            Ok(()) => debug!(index = %index, "Audit document indexed"),
            Err(e) => {
                warn!(
                    error = %e,
                    "Audit server configured but cannot connect: {}",
                    serde_json::to_string(&document).unwrap_or_default()
                );
            }
        }
        Ok(())
    }
}
