//! 監査ドキュメントのデータモデル
//!
//! 受信リクエスト1件 = `AuditSession`、その処理中の外部呼び出し1件 = `AuditEntry`。
//! シリアライズ形式（camelCase）はキュー/インデックスへ送信するドキュメントそのもの。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 値が解決できなかった場合の番兵値
pub const UNKNOWN: &str = "<unknown>";

/// `additionalProperties` の既知キー
pub mod properties {
    /// 操作種別
    pub const OPERATION_TYPE: &str = "operation";
    /// インタラクションID
    pub const INTERACTION_ID: &str = "interactionId";
    /// 呼び出し元のサプライヤーID（解決済みアイデンティティ）
    pub const SUPPLIER_ID: &str = "supplierId";
}

/// 監査セッション（受信リクエスト1件分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSession {
    /// セッション開始時刻
    pub created_date: DateTime<Utc>,
    /// リクエストURL
    #[serde(default)]
    pub request_url: String,
    /// HTTPメソッド
    #[serde(default)]
    pub request_method: String,
    /// 正規化済みリクエストヘッダ
    #[serde(default)]
    pub request_headers: String,
    /// リクエストボディ（完了時に確定）
    #[serde(default)]
    pub request_body: String,
    /// リクエスト送信元
    #[serde(default)]
    pub request_origin: String,
    /// レスポンスステータス（完了時に設定）
    #[serde(default)]
    pub response_status: String,
    /// 正規化済みレスポンスヘッダ（完了時に設定）
    #[serde(default)]
    pub response_headers: String,
    /// レスポンスボディ（完了時に設定）
    #[serde(default)]
    pub response_body: String,
    /// 追加プロパティ（後勝ち）
    #[serde(default)]
    pub additional_properties: BTreeMap<String, String>,
    /// 外部呼び出しエントリ（呼び出し順）
    #[serde(default)]
    pub entries: Vec<AuditEntry>,
}

impl AuditSession {
    /// 指定時刻に開始した空のセッションを作成
    pub fn new(created_date: DateTime<Utc>) -> Self {
        Self {
            created_date,
            request_url: String::new(),
            request_method: String::new(),
            request_headers: String::new(),
            request_body: String::new(),
            request_origin: String::new(),
            response_status: String::new(),
            response_headers: String::new(),
            response_body: String::new(),
            additional_properties: BTreeMap::new(),
            entries: Vec::new(),
        }
    }

    /// 解決済みアイデンティティ
    ///
    /// `supplierId` が存在し、空白でも番兵値でもない場合のみ返す。
    pub fn identity(&self) -> Option<&str> {
        self.additional_properties
            .get(properties::SUPPLIER_ID)
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && *id != UNKNOWN)
    }

    /// 追加プロパティを取得
    pub fn property(&self, key: &str) -> Option<&str> {
        self.additional_properties.get(key).map(String::as_str)
    }
}

/// 監査エントリ（外部呼び出し1件分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// エントリ開始時刻
    pub date_of_entry: DateTime<Utc>,
    /// 呼び出し先URL
    #[serde(default)]
    pub request_url: String,
    /// HTTPメソッド
    #[serde(default)]
    pub request_method: String,
    /// 正規化済みリクエストヘッダ
    #[serde(default)]
    pub request_headers: String,
    /// リクエストボディ
    #[serde(default)]
    pub request_body: String,
    /// レスポンスステータス（クローズ時に設定）
    #[serde(default)]
    pub response_status: String,
    /// 正規化済みレスポンスヘッダ（クローズ時に設定）
    #[serde(default)]
    pub response_headers: String,
    /// レスポンスボディ（クローズ時に設定）
    #[serde(default)]
    pub response_body: String,
}

impl AuditEntry {
    /// 指定時刻に開始した空のエントリを作成
    pub fn new(date_of_entry: DateTime<Utc>) -> Self {
        Self {
            date_of_entry,
            request_url: String::new(),
            request_method: String::new(),
            request_headers: String::new(),
            request_body: String::new(),
            response_status: String::new(),
            response_headers: String::new(),
            response_body: String::new(),
        }
    }

    /// レスポンスが記録済みか
    pub fn is_closed(&self) -> bool {
        !self.response_status.is_empty()
    }
}

/// 監査対象の操作種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// サービス検索
    #[serde(rename = "Service Search")]
    ServiceSearch,
    /// エンカウンター
    #[serde(rename = "Encounter")]
    Encounter,
    /// 有効性チェック
    #[serde(rename = "Is Valid")]
    IsValid,
    /// サービス確認
    #[serde(rename = "Check Services")]
    CheckServices,
    /// エンカウンターレポート
    #[serde(rename = "Encounter Report")]
    EncounterReport,
    /// エンカウンター検索
    #[serde(rename = "Encounter Search")]
    EncounterSearch,
}

impl OperationType {
    /// 全バリアント
    pub const ALL: [OperationType; 6] = [
        Self::ServiceSearch,
        Self::Encounter,
        Self::IsValid,
        Self::CheckServices,
        Self::EncounterReport,
        Self::EncounterSearch,
    ];

    /// snake_case の名前（プロパティ値として記録する形式）
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServiceSearch => "service_search",
            Self::Encounter => "encounter",
            Self::IsValid => "is_valid",
            Self::CheckServices => "check_services",
            Self::EncounterReport => "encounter_report",
            Self::EncounterSearch => "encounter_search",
        }
    }

    /// 表示名
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ServiceSearch => "Service Search",
            Self::Encounter => "Encounter",
            Self::IsValid => "Is Valid",
            Self::CheckServices => "Check Services",
            Self::EncounterReport => "Encounter Report",
            Self::EncounterSearch => "Encounter Search",
        }
    }

    /// 名前から変換（大文字小文字は区別しない）
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
