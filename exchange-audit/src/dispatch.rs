//! 完了セッションの非同期配信
//!
//! mpscチャネルでセッションを受け取り、バックグラウンドタスクがシンクへ1件ずつ配信する。
//! リクエスト処理側は `try_send` するだけで待機しない。

use crate::sink::AuditSink;
use exchange_audit_common::AuditSession;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 監査セッションの非同期ディスパッチャ
///
/// Clone可能（senderのクローン）。
#[derive(Clone)]
pub struct AuditDispatcher {
    sender: mpsc::Sender<AuditSession>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AuditDispatcher {
    /// 新しいディスパッチャを作成し、バックグラウンドタスクを起動
    pub fn new(sink: Arc<dyn AuditSink>, capacity: usize, delivery_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let task = tokio::spawn(Self::background_task(rx, sink, delivery_timeout));

        Self {
            sender: tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// セッションを配信キューへ送る（ブロックしない）
    pub fn dispatch(&self, session: AuditSession) {
        if let Err(e) = self.sender.try_send(session) {
            let session = match &e {
                mpsc::error::TrySendError::Full(s) | mpsc::error::TrySendError::Closed(s) => s,
            };
            warn!(
                url = %session.request_url,
                "Failed to dispatch audit session: {}",
                e
            );
        }
    }

    /// チャネルを閉じ、残りのセッションの配信完了を待つ
    ///
    /// 他のクローンが生存している間はチャネルが閉じないため、全ハンドルを破棄してから呼ぶこと。
    pub async fn shutdown(self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(self.sender);

        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Audit dispatcher task failed: {}", e);
            }
        }
    }

    /// バックグラウンド配信タスク
    async fn background_task(
        mut rx: mpsc::Receiver<AuditSession>,
        sink: Arc<dyn AuditSink>,
        delivery_timeout: Duration,
    ) {
        let mut delivered = 0usize;
        while let Some(session) = rx.recv().await {
            Self::deliver(sink.as_ref(), session, delivery_timeout).await;
            delivered += 1;
        }
        // チャネルが閉じられた（recvはバッファ分を返し切ってからNoneになる）
        info!(delivered, "Audit dispatcher background task stopped");
    }

    async fn deliver(sink: &dyn AuditSink, session: AuditSession, delivery_timeout: Duration) {
        let url = session.request_url.clone();
        match tokio::time::timeout(delivery_timeout, sink.send(session)).await {
            Ok(Ok(())) => debug!(url = %url, "Audit session delivered"),
            Ok(Err(e)) => error!(url = %url, error = %e, "Audit sink refused session"),
            Err(_) => warn!(
                url = %url,
                timeout_ms = delivery_timeout.as_millis() as u64,
                "Audit delivery timed out"
            ),
        }
    }
}
