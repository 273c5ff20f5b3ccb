//! ロギング初期化ユーティリティ
//!
//! 標準エラー出力へのfmtレイヤーに加え、`EXCHANGE_AUDIT_LOG_DIR` が設定されていれば
//! 日次ローテーションのファイル出力も行う。

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// ログレベル指定の環境変数
pub const LOG_LEVEL_ENV: &str = "EXCHANGE_AUDIT_LOG_LEVEL";

/// ログファイル出力先の環境変数
pub const LOG_DIR_ENV: &str = "EXCHANGE_AUDIT_LOG_DIR";

const DEFAULT_LEVEL: &str = "info";
const LOG_FILE_PREFIX: &str = "exchange-audit.log";

/// グローバルsubscriberを初期化する
///
/// ファイル出力を有効にした場合は `WorkerGuard` を返す。プロセス終了まで保持すること。
pub fn init() -> Result<Option<WorkerGuard>, TryInitError> {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    let log_dir = std::env::var(LOG_DIR_ENV)
        .ok()
        .filter(|dir| !dir.trim().is_empty());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init()?;
            Ok(None)
        }
    }
}
