//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! ライフサイクル違反（呼び出しの対応崩れ）は `AuditError` として呼び出し元へ返す。
//! 配信時の障害はシンク内部で完結させ、呼び出し元へ返すのは
//! `SinkError::MissingIdentity` のみ。

use thiserror::Error;

/// Audit lifecycle / configuration error type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// No audit session is open in the current context
    #[error("No audit session is open in this context")]
    NoOpenSession,

    /// No audit entry is open in the current context
    #[error("No audit entry is open in this context")]
    NoOpenEntry,

    /// Additional property key was empty
    #[error("Audit property key must not be empty")]
    EmptyPropertyKey,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuditError {
    /// Returns true if this error signals broken open/close pairing
    pub fn is_lifecycle_violation(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

/// Delivery sink error type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The session carries no resolved identity and the sink requires one
    #[error("Audit session has no resolved identity")]
    MissingIdentity,
}
