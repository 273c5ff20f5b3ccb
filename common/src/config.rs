//! 設定管理
//!
//! AuditConfig, SinkConfig等の設定構造体

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 監査設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// 送信元サービス名（デフォルト: "exchange-audit"）
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// 送信元判定に使う転送ヘッダ (デフォルト: "x-forwarded-for")
    #[serde(default = "default_forwarded_header")]
    pub forwarded_header: String,

    /// アイデンティティを読み取るヘッダ (デフォルト: "x-supplier-id")
    ///
    /// このサービスはクライアントが送ったヘッダを除去しない。認証ゲートウェイなど
    /// エッジで受信ヘッダを削除または上書きしていない構成では、呼び出し元が
    /// 任意のアイデンティティを名乗れる。
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// 監査対象外のパス (デフォルト: ["/health"])
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,

    /// 配信キューの上限セッション数 (デフォルト: 1024)
    #[serde(default = "default_dispatch_buffer_capacity")]
    pub dispatch_buffer_capacity: usize,

    /// 1セッションあたりの配信タイムアウト（ミリ秒）(デフォルト: 1000)
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// 配信先シンク設定
    #[serde(default)]
    pub sink: SinkConfig,
}

fn default_service_name() -> String {
    "exchange-audit".to_string()
}

fn default_forwarded_header() -> String {
    "x-forwarded-for".to_string()
}

fn default_identity_header() -> String {
    "x-supplier-id".to_string()
}

fn default_excluded_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

fn default_dispatch_buffer_capacity() -> usize {
    1024
}

fn default_delivery_timeout_ms() -> u64 {
    1000
}

impl AuditConfig {
    /// 配信タイムアウト
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// パスが監査対象外か判定する
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|excluded| excluded == path)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            forwarded_header: default_forwarded_header(),
            identity_header: default_identity_header(),
            excluded_paths: default_excluded_paths(),
            dispatch_buffer_capacity: default_dispatch_buffer_capacity(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            sink: SinkConfig::default(),
        }
    }
}

/// シンク種別（起動時に一度だけ選択する）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// メッセージキューへ送信
    Queue,
    /// 検索インデックスへ書き込み
    Index,
}

impl SinkKind {
    /// 文字列から変換
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Some(Self::Queue),
            "index" => Some(Self::Index),
            _ => None,
        }
    }
}

/// シンク設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// シンク種別 (デフォルト: index)
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,

    /// キューのURL（queue の場合必須）
    #[serde(default)]
    pub queue_url: Option<String>,

    /// インデックスストアのエンドポイント (デフォルト: "http://localhost:9200")
    #[serde(default = "default_index_endpoint")]
    pub index_endpoint: Option<String>,

    /// 接続タイムアウト（ミリ秒）(デフォルト: 50)
    #[serde(default = "default_backend_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// リクエストタイムアウト（ミリ秒）(デフォルト: 50)
    #[serde(default = "default_backend_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_sink_kind() -> SinkKind {
    SinkKind::Index
}

fn default_index_endpoint() -> Option<String> {
    Some("http://localhost:9200".to_string())
}

fn default_backend_timeout_ms() -> u64 {
    50
}

impl SinkConfig {
    /// 接続タイムアウト
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// リクエストタイムアウト
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
            queue_url: None,
            index_endpoint: default_index_endpoint(),
            connect_timeout_ms: default_backend_timeout_ms(),
            request_timeout_ms: default_backend_timeout_ms(),
        }
    }
}
