//! バックグラウンドリフレッシュのスケジューラ。
//!
//! 種別ごとに独立したタスクを起動し、エンジン破棄時や `shutdown` でまとめてキャンセルする。
//! `shutdown` 後は新しいキャンセルトークンで再びタスクを起動できる。

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// トークン有効期限に対するリフレッシュ時点の割合。
pub const DEFAULT_TOKEN_REFRESH_RATE: f64 = 0.8;

/// リフレッシュ失敗時のバックオフの初期値。
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// リフレッシュ失敗時のバックオフの上限。
pub const MAX_BACKOFF: Duration = Duration::from_secs(65);

/// RefreshScheduler はリフレッシュタスクの起動と停止を管理する。
pub struct RefreshScheduler {
    cancel_token: Mutex<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self {
            cancel_token: Mutex::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// `interval` ごとに `tick` を実行するタスクを起動する。
    /// `tick` の失敗は `tick` 自身が記録し、ループは止めない。
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, interval: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.current_token();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        tracing::debug!(task = name, "リフレッシュを実行します");
                        tick().await;
                    }
                }
            }
            tracing::debug!(task = name, "リフレッシュタスクを停止しました");
        });
        self.push(handle);
    }

    /// 有効期限付きリソースを期限前に取り直すタスクを起動する。
    ///
    /// `tick` は成功時に新しい有効期限を `Some` で、失敗時に `None` を返す。
    /// 成功後は有効期限の一定割合後に、失敗後は `Backoff` に従って再実行する。
    pub fn spawn_with_backoff<F, Fut>(&self, name: &'static str, expires_in: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Option<Duration>> + Send + 'static,
    {
        let token = self.current_token();
        let handle = tokio::spawn(async move {
            let mut backoff = Backoff::new();
            let mut delay = backoff.on_success(expires_in);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {
                        delay = match tick().await {
                            Some(expires_in) => backoff.on_success(expires_in),
                            None => backoff.on_failure(),
                        };
                        tracing::debug!(task = name, next_in_ms = delay.as_millis(), "次回リフレッシュを予約しました");
                    }
                }
            }
            tracing::debug!(task = name, "リフレッシュタスクを停止しました");
        });
        self.push(handle);
    }

    /// 全タスクをキャンセルし、終了を待つ。
    /// 以降に起動するタスクは新しいキャンセルトークンに紐づく。
    pub async fn shutdown(&self) {
        {
            let mut token = self
                .cancel_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            token.cancel();
            *token = CancellationToken::new();
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "リフレッシュタスクが異常終了しました");
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, handle: JoinHandle<()>) {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel_token
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

/// Backoff はトークンリフレッシュの次回待機時間を決める。
///
/// 成功時は有効期限の一定割合後（ただし初期バックオフ以上）、
/// 失敗時は初期値から倍々に伸ばし上限で頭打ちにする。
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }

    /// 成功時の待機時間を返し、バックオフをリセットする。
    /// 有効期限が極端に短い場合でも `INITIAL_BACKOFF` より短くはしない。
    pub fn on_success(&mut self, expires_in: Duration) -> Duration {
        self.current = INITIAL_BACKOFF;
        expires_in
            .mul_f64(DEFAULT_TOKEN_REFRESH_RATE)
            .max(INITIAL_BACKOFF)
    }

    /// 失敗時の待機時間を返し、次回のバックオフを倍にする。
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
