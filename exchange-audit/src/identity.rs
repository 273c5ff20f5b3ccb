//! アイデンティティ解決
//!
//! 認証機構そのものは外部協調者として扱い、「現在の呼び出し元ID（任意）」を
//! 返す関数としてのみ利用する。

use crate::capture::{header, CapturedRequest};

/// 受信リクエストから呼び出し元のアイデンティティを解決する
pub trait IdentityResolver: Send + Sync {
    /// 解決できない場合は `None`
    fn resolve(&self, request: &CapturedRequest) -> Option<String>;
}

impl<F> IdentityResolver for F
where
    F: Fn(&CapturedRequest) -> Option<String> + Send + Sync,
{
    fn resolve(&self, request: &CapturedRequest) -> Option<String> {
        self(request)
    }
}

/// アイデンティティを持たない（常に未解決）
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl IdentityResolver for NoIdentity {
    fn resolve(&self, _request: &CapturedRequest) -> Option<String> {
        None
    }
}

/// 上流の認証ゲートウェイが付与したヘッダから読み取る
///
/// ヘッダの値はそのまま信用する。クライアントが付けた同名ヘッダはエッジで
/// 除去されている必要がある（`AuditConfig::identity_header` 参照）。
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: String,
}

impl HeaderIdentity {
    /// 読み取るヘッダ名を指定して作成
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, request: &CapturedRequest) -> Option<String> {
        header(request, &self.header)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}
