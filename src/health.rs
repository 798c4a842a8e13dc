//! リフレッシュ処理の健全性状態。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::error::IamError;

/// RefreshKind はバックグラウンドリフレッシュの種別を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshKind {
    Jwks,
    RevocationList,
    ClientToken,
}

impl RefreshKind {
    pub fn name(self) -> &'static str {
        match self {
            RefreshKind::Jwks => "jwks",
            RefreshKind::RevocationList => "revocation-list",
            RefreshKind::ClientToken => "client-token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    pub message: Option<String>,
}

/// HealthReport は各リフレッシュ種別の直近結果をまとめたもの。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: HashMap<String, CheckResult>,
}

/// HealthState はリフレッシュ種別ごとの直近エラーを保持する。
///
/// 各スロットは同じ種別の次のサイクルで上書きされるまで保持される。
#[derive(Debug, Default)]
pub struct HealthState {
    jwks_error: RwLock<Option<String>>,
    revocation_error: RwLock<Option<String>>,
    client_token_error: RwLock<Option<String>>,
    client_token_refresh_active: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// サイクルの結果を記録する。成功ならそのスロットのエラーをクリアする。
    pub fn record<T>(&self, kind: RefreshKind, result: &Result<T, IamError>) {
        let mut slot = self
            .slot(kind)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = result.as_ref().err().map(ToString::to_string);
    }

    pub fn last_error(&self, kind: RefreshKind) -> Option<String> {
        self.slot(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_client_token_refresh_active(&self, active: bool) {
        self.client_token_refresh_active
            .store(active, Ordering::SeqCst);
    }

    pub fn client_token_refresh_active(&self) -> bool {
        self.client_token_refresh_active.load(Ordering::SeqCst)
    }

    /// JWKS と失効リストのエラーがなく、トークンリフレッシュが有効ならそのエラーもない場合に健全とする。
    pub fn is_healthy(&self) -> bool {
        self.monitored_kinds()
            .into_iter()
            .all(|kind| self.last_error(kind).is_none())
    }

    pub fn report(&self) -> HealthReport {
        let mut checks = HashMap::new();
        let mut overall = HealthStatus::Healthy;

        for kind in self.monitored_kinds() {
            let message = self.last_error(kind);
            let status = if message.is_some() {
                overall = HealthStatus::Unhealthy;
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            };
            checks.insert(kind.name().to_string(), CheckResult { status, message });
        }

        HealthReport {
            status: overall,
            checks,
        }
    }

    fn monitored_kinds(&self) -> Vec<RefreshKind> {
        let mut kinds = vec![RefreshKind::Jwks, RefreshKind::RevocationList];
        if self.client_token_refresh_active() {
            kinds.push(RefreshKind::ClientToken);
        }
        kinds
    }

    fn slot(&self, kind: RefreshKind) -> &RwLock<Option<String>> {
        match kind {
            RefreshKind::Jwks => &self.jwks_error,
            RefreshKind::RevocationList => &self.revocation_error,
            RefreshKind::ClientToken => &self.client_token_error,
        }
    }
}
