//! メッセージキューシンク

use super::{truncated, AuditSink};
use async_trait::async_trait;
use exchange_audit_common::{properties, AuditSession, SinkError};
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 送信者サービス名を載せるメッセージ属性
pub const SENDER_ATTRIBUTE: &str = "sender";

/// キューへ発行する1メッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    /// 発行先キューのURL
    pub queue_url: String,
    /// 順序保証のグループキー（アイデンティティ）
    pub group_id: String,
    /// 重複排除キー（送信ごとに新規）
    pub deduplication_id: String,
    /// メッセージ属性
    pub attributes: BTreeMap<String, String>,
    /// シリアライズ済みセッション
    pub body: String,
}

/// キュー発行エラー
#[derive(Debug, Error)]
pub enum QueueError {
    /// メッセージサイズ上限超過
    #[error("payload too large")]
    PayloadTooLarge,
    /// キューが拒否した
    #[error("queue rejected message: HTTP {status}")]
    Rejected {
        /// HTTPステータス
        status: u16,
        /// レスポンスボディ
        body: String,
    },
    /// 接続・送受信エラー
    #[error("queue transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// メッセージキュークライアント
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// メッセージを1件発行する
    async fn publish(&self, message: QueueMessage) -> Result<(), QueueError>;
}

/// メッセージをJSONとしてキューURLへPOSTするクライアント
#[derive(Debug, Clone)]
pub struct HttpQueueClient {
    http: reqwest::Client,
}

impl HttpQueueClient {
    /// reqwestクライアントを包んで作成
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn publish(&self, message: QueueMessage) -> Result<(), QueueError> {
        let response = self
            .http
            .post(&message.queue_url)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(QueueError::PayloadTooLarge);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// アイデンティティをグループキーとしてキューへ発行するシンク
pub struct QueueAuditSink {
    client: Arc<dyn QueueClient>,
    queue_url: String,
    service_name: String,
}

impl QueueAuditSink {
    /// 発行先キューと送信者サービス名を指定して作成
    pub fn new(
        client: Arc<dyn QueueClient>,
        queue_url: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            service_name: service_name.into(),
        }
    }

    fn message(&self, identity: &str, body: String) -> QueueMessage {
        let mut attributes = BTreeMap::new();
        attributes.insert(SENDER_ATTRIBUTE.to_string(), self.service_name.clone());
        attributes.insert(properties::SUPPLIER_ID.to_string(), identity.to_string());

        QueueMessage {
            queue_url: self.queue_url.clone(),
            group_id: identity.to_string(),
            deduplication_id: Uuid::new_v4().to_string(),
            attributes,
            body,
        }
    }
}

#[async_trait]
impl AuditSink for QueueAuditSink {
    async fn send(&self, session: AuditSession) -> Result<(), SinkError> {
        let Some(identity) = session.identity() else {
            info!(
                url = %session.request_url,
                "No supplier identity on audit session, skipping queue delivery"
            );
            return Ok(());
        };

        let body = match serde_json::to_string(&session) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize audit session");
                return Ok(());
            }
        };

        let message = self.message(identity, body);
        match self.client.publish(message).await {
            Ok(()) => debug!(supplier_id = %identity, "Audit session published"),
            Err(QueueError::PayloadTooLarge) => {
                warn!(
                    session = %truncated(&session),
                    "Audit message too large for queue"
                );
            }
            Err(e) => error!(error = %e, "Failed to publish audit session"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture::capture_logs;
    use chrono::Utc;
    use std::sync::Mutex;
    use tracing::Level;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingClient {
        published: Mutex<Vec<QueueMessage>>,
        too_large: bool,
    }

    #[async_trait]
    impl QueueClient for RecordingClient {
        async fn publish(&self, message: QueueMessage) -> Result<(), QueueError> {
            self.published.lock().unwrap().push(message);
            if self.too_large {
                Err(QueueError::PayloadTooLarge)
            } else {
                Ok(())
            }
        }
    }

    fn session(identity: Option<&str>) -> AuditSession {
        let mut session = AuditSession::new(Utc::now());
        session.request_url = "http://svc/search".to_string();
        if let Some(identity) = identity {
            session
                .additional_properties
                .insert(properties::SUPPLIER_ID.to_string(), identity.to_string());
        }
        session
    }

    #[tokio::test]
    async fn test_skips_without_identity() {
        let (logs, _guard) = capture_logs();
        let client = Arc::new(RecordingClient::default());
        let sink = QueueAuditSink::new(client.clone(), "http://queue", "svc");

        assert!(sink.send(session(None)).await.is_ok());
        assert!(sink
            .send(session(Some(exchange_audit_common::UNKNOWN)))
            .await
            .is_ok());

        assert!(client.published.lock().unwrap().is_empty());
        assert!(logs.has_event(Level::INFO, "skipping queue delivery"));
    }

    #[tokio::test]
    async fn test_publishes_with_group_and_attributes() {
        let client = Arc::new(RecordingClient::default());
        let sink = QueueAuditSink::new(client.clone(), "http://queue", "svc");

        sink.send(session(Some("supplier-1"))).await.unwrap();
        sink.send(session(Some("supplier-1"))).await.unwrap();

        let published = client.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        let first = &published[0];
        assert_eq!(first.queue_url, "http://queue");
        assert_eq!(first.group_id, "supplier-1");
        assert_eq!(first.attributes["sender"], "svc");
        assert_eq!(first.attributes["supplierId"], "supplier-1");
        assert_ne!(first.deduplication_id, published[1].deduplication_id);

        let body: AuditSession = serde_json::from_str(&first.body).unwrap();
        assert_eq!(body.request_url, "http://svc/search");
    }

    #[tokio::test]
    async fn test_payload_too_large_is_logged_not_raised() {
        let (logs, _guard) = capture_logs();
        let client = Arc::new(RecordingClient {
            too_large: true,
            ..Default::default()
        });
        let sink = QueueAuditSink::new(client, "http://queue", "svc");

        assert!(sink.send(session(Some("supplier-1"))).await.is_ok());
        assert!(logs.has_event(Level::WARN, "too large"));
    }

    #[tokio::test]
    async fn test_http_client_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue/audit.fifo"))
            .and(body_partial_json(serde_json::json!({
                "groupId": "supplier-1",
                "attributes": {"sender": "svc"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpQueueClient::new(reqwest::Client::new());
        let sink = QueueAuditSink::new(
            Arc::new(client),
            format!("{}/queue/audit.fifo", server.uri()),
            "svc",
        );
        sink.send(session(Some("supplier-1"))).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_client_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(413))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/denied"))
            .respond_with(ResponseTemplate::new(403).set_body_string("nope"))
            .mount(&server)
            .await;

        let client = HttpQueueClient::new(reqwest::Client::new());
        let message = |url: String| QueueMessage {
            queue_url: url,
            group_id: "g".to_string(),
            deduplication_id: "d".to_string(),
            attributes: BTreeMap::new(),
            body: "{}".to_string(),
        };

        let err = client
            .publish(message(format!("{}/big", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::PayloadTooLarge));

        let err = client
            .publish(message(format!("{}/denied", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Rejected { status: 403, ref body } if body == "nope"));
    }

    #[tokio::test]
    async fn test_unreachable_queue_is_swallowed() {
        let client = HttpQueueClient::new(
            reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_millis(50))
                .build()
                .unwrap(),
        );
        let sink = QueueAuditSink::new(Arc::new(client), "http://127.0.0.1:9/queue", "svc");
        assert!(sink.send(session(Some("supplier-1"))).await.is_ok());
    }
}
