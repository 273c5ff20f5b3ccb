//! exchange-audit 共通型
//!
//! 監査セッション・エントリのデータモデル、設定、エラー型

#![warn(missing_docs)]

/// 設定構造体
pub mod config;

/// エラー型定義
pub mod error;

/// 監査ドキュメントのデータモデル
pub mod model;

pub use config::{AuditConfig, SinkConfig, SinkKind};
pub use error::{AuditError, SinkError};
pub use model::{properties, AuditEntry, AuditSession, OperationType, UNKNOWN};
