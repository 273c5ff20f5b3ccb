//! exchange-audit
//!
//! 受信リクエストを監査セッション、処理中の外部呼び出しをエントリとして記録し、
//! 完了したセッションを設定されたシンクへ配信する。

#![warn(missing_docs)]

/// 取得ヘルパー（ボディ・ヘッダのテキスト化）
pub mod capture;

/// CLI
pub mod cli;

/// 監査付きHTTPクライアント
pub mod client;

/// 環境変数からの設定読み込み
pub mod config;

/// コンテキストごとの状態ストア
pub mod context;

/// 非同期配信
pub mod dispatch;

/// アイデンティティ解決
pub mod identity;

/// ロギング初期化
pub mod logging;

/// 監査ミドルウェア
pub mod middleware;

/// セッションライフサイクル管理
pub mod service;

/// 配信先シンク
pub mod sink;

pub use client::{AuditedClient, ClientError};
pub use context::AuditContext;
pub use dispatch::AuditDispatcher;
pub use middleware::{audit_middleware, AuditState};
pub use service::AuditService;
pub use sink::{build_sink, AuditSink};
