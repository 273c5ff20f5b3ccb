//! 実行コンテキストごとの監査状態ストア
//!
//! 受信リクエスト1件につき1つの `AuditContext` を作成し、呼び出しチェーンへ
//! 明示的に受け渡す。スレッドやタスクの識別子には依存しないため、
//! ワーカースレッド間で多重化されても他のコンテキストの状態は見えない。
//!
//! ストア自体は検証を行わない。前提条件の判定は `AuditService` の責務。

use exchange_audit_common::{AuditEntry, AuditSession};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// セッション内エントリ列の位置
///
/// エントリはオープン時にセッションへ追加されるため、現在エントリは
/// セッションのエントリ列への参照として保持する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef(usize);

impl EntryRef {
    /// エントリ列上の位置
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
struct Slots {
    session: Option<AuditSession>,
    entry: Option<EntryRef>,
}

/// 監査コンテキスト
///
/// 「現在のセッション」「現在のエントリ」の2スロットを持つ。
/// Clone可能（同じスロットを共有するハンドル）。
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    slots: Arc<Mutex<Slots>>,
}

impl AuditContext {
    /// 空のコンテキストを作成
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 現在のセッション（スナップショット）
    pub fn current_session(&self) -> Option<AuditSession> {
        self.lock().session.clone()
    }

    /// 現在のエントリ（スナップショット）
    pub fn current_entry(&self) -> Option<AuditEntry> {
        let slots = self.lock();
        let entry = slots.entry?;
        slots.session.as_ref()?.entries.get(entry.0).cloned()
    }

    /// セッションがオープンしているか
    pub fn has_session(&self) -> bool {
        self.lock().session.is_some()
    }

    /// エントリがオープンしているか
    pub fn has_entry(&self) -> bool {
        self.lock().entry.is_some()
    }

    /// 現在のセッションを無条件に置き換える
    ///
    /// 置き換えられたセッションを返す。エントリスロットは旧セッションを
    /// 指しているためクリアされる。
    pub fn set_session(&self, session: AuditSession) -> Option<AuditSession> {
        let mut slots = self.lock();
        slots.entry = None;
        slots.session.replace(session)
    }

    /// 現在のセッションを取り外す（未設定なら何もしない）
    pub fn clear_session(&self) -> Option<AuditSession> {
        let mut slots = self.lock();
        slots.entry = None;
        slots.session.take()
    }

    /// エントリを現在のセッションのエントリ列末尾へ追加する
    ///
    /// セッションが無い場合はエントリを破棄して `None` を返す。
    pub fn attach_entry(&self, entry: AuditEntry) -> Option<EntryRef> {
        let mut slots = self.lock();
        let session = slots.session.as_mut()?;
        session.entries.push(entry);
        Some(EntryRef(session.entries.len() - 1))
    }

    /// 現在のエントリを無条件に設定
    pub fn set_entry(&self, entry: EntryRef) {
        self.lock().entry = Some(entry);
    }

    /// 現在のエントリをクリア（未設定なら何もしない）
    pub fn clear_entry(&self) -> Option<EntryRef> {
        self.lock().entry.take()
    }

    /// 現在のセッションを変更する
    ///
    /// ロック保持中に `f` を呼ぶため、`f` 内からこのコンテキストを操作してはならない。
    pub fn with_session<R>(&self, f: impl FnOnce(&mut AuditSession) -> R) -> Option<R> {
        self.lock().session.as_mut().map(f)
    }

    /// 現在のエントリを変更する（変更はセッション側からも見える）
    pub fn with_entry<R>(&self, f: impl FnOnce(&mut AuditEntry) -> R) -> Option<R> {
        let mut slots = self.lock();
        let entry = slots.entry?;
        slots.session.as_mut()?.entries.get_mut(entry.0).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn session(url: &str) -> AuditSession {
        let mut session = AuditSession::new(Utc::now());
        session.request_url = url.to_string();
        session
    }

    #[test]
    fn test_empty_context_returns_nothing() {
        let ctx = AuditContext::new();

        assert!(ctx.current_session().is_none());
        assert!(ctx.current_entry().is_none());
        assert!(!ctx.has_session());
        assert!(!ctx.has_entry());
        assert!(ctx.with_session(|_| ()).is_none());
        assert!(ctx.with_entry(|_| ()).is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let ctx = AuditContext::new();
        assert!(ctx.clear_session().is_none());
        assert!(ctx.clear_entry().is_none());

        ctx.set_session(session("/a"));
        assert!(ctx.clear_session().is_some());
        assert!(ctx.clear_session().is_none());
    }

    #[test]
    fn test_set_session_overwrites_and_resets_entry() {
        let ctx = AuditContext::new();
        assert!(ctx.set_session(session("/first")).is_none());
        let entry = ctx.attach_entry(AuditEntry::new(Utc::now())).unwrap();
        ctx.set_entry(entry);
        assert!(ctx.has_entry());

        let displaced = ctx.set_session(session("/second")).unwrap();
        assert_eq!(displaced.request_url, "/first");
        assert_eq!(displaced.entries.len(), 1);
        assert!(!ctx.has_entry());
        assert_eq!(ctx.current_session().unwrap().request_url, "/second");
    }

    #[test]
    fn test_attach_entry_requires_session() {
        let ctx = AuditContext::new();
        assert!(ctx.attach_entry(AuditEntry::new(Utc::now())).is_none());
    }

    #[test]
    fn test_entry_mutation_visible_through_session() {
        let ctx = AuditContext::new();
        ctx.set_session(session("/a"));
        let first = ctx.attach_entry(AuditEntry::new(Utc::now())).unwrap();
        let second = ctx.attach_entry(AuditEntry::new(Utc::now())).unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);

        ctx.set_entry(second);
        ctx.with_entry(|entry| entry.response_status = "201".to_string());

        let snapshot = ctx.current_session().unwrap();
        assert_eq!(snapshot.entries[0].response_status, "");
        assert_eq!(snapshot.entries[1].response_status, "201");
        assert_eq!(ctx.current_entry().unwrap().response_status, "201");
    }

    #[test]
    fn test_clones_share_state_but_contexts_are_isolated() {
        let ctx = AuditContext::new();
        let handle = ctx.clone();
        let other = AuditContext::new();

        ctx.set_session(session("/mine"));

        assert!(handle.has_session());
        assert!(!other.has_session());
        other.set_session(session("/theirs"));
        assert_eq!(handle.current_session().unwrap().request_url, "/mine");
    }

    #[tokio::test]
    async fn test_isolation_across_tasks() {
        let mut handles = Vec::new();
        for i in 0..16 {
            handles.push(tokio::spawn(async move {
                let ctx = AuditContext::new();
                ctx.set_session(session(&format!("/req/{i}")));
                for _ in 0..i {
                    let entry = ctx.attach_entry(AuditEntry::new(Utc::now())).unwrap();
                    ctx.set_entry(entry);
                    tokio::task::yield_now().await;
                    ctx.clear_entry();
                }
                ctx.clear_session().unwrap()
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let session = handle.await.unwrap();
            assert_eq!(session.request_url, format!("/req/{i}"));
            assert_eq!(session.entries.len(), i);
        }
    }
}
