//! IAM クライアントの設定構造体。

use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

/// ロール権限キャッシュ TTL のデフォルト値（60 秒）。
pub const DEFAULT_ROLES_CACHE_TTL_SECS: i64 = 60;

/// JWKS リフレッシュ間隔のデフォルト値（60 秒）。
pub const DEFAULT_JWKS_REFRESH_INTERVAL_SECS: i64 = 60;

/// 失効リストリフレッシュ間隔のデフォルト値（60 秒）。
pub const DEFAULT_REVOCATION_REFRESH_INTERVAL_SECS: i64 = 60;

/// 外部フェッチのタイムアウトのデフォルト値（10 秒）。
pub const DEFAULT_FETCH_TIMEOUT_SECS: i64 = 10;

/// クライアントベース URI キャッシュ TTL のデフォルト値（60 秒）。
pub const DEFAULT_BASE_URI_CACHE_TTL_SECS: i64 = 60;

/// ロール権限キャッシュの最大エントリ数のデフォルト値。
pub const DEFAULT_ROLES_CACHE_CAPACITY: u64 = 10_000;

fn default_roles_cache_capacity() -> u64 {
    DEFAULT_ROLES_CACHE_CAPACITY
}

/// IamConfig は IAM クライアントの設定を表す。
///
/// 秒数の項目は未設定（0）または負の値の場合にデフォルト値へフォールバックする。
/// 値は直接参照せず、`Duration` を返すアクセサ経由で取得すること。
#[derive(Debug, Clone, Deserialize)]
pub struct IamConfig {
    /// IAM サービスのベース URL。
    pub base_url: String,

    /// OAuth2 クライアント ID。
    pub client_id: String,

    /// OAuth2 クライアントシークレット。
    pub client_secret: SecretString,

    #[serde(default)]
    pub roles_cache_ttl_secs: i64,

    #[serde(default)]
    pub jwks_refresh_interval_secs: i64,

    #[serde(default)]
    pub revocation_refresh_interval_secs: i64,

    #[serde(default)]
    pub fetch_timeout_secs: i64,

    #[serde(default)]
    pub base_uri_cache_ttl_secs: i64,

    #[serde(default = "default_roles_cache_capacity")]
    pub roles_cache_capacity: u64,
}

impl IamConfig {
    /// 最小限の設定で IamConfig を生成する。間隔・TTL はすべてデフォルト値になる。
    pub fn new(base_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: SecretString::new(client_secret.to_string()),
            roles_cache_ttl_secs: 0,
            jwks_refresh_interval_secs: 0,
            revocation_refresh_interval_secs: 0,
            fetch_timeout_secs: 0,
            base_uri_cache_ttl_secs: 0,
            roles_cache_capacity: DEFAULT_ROLES_CACHE_CAPACITY,
        }
    }

    pub fn with_roles_cache_ttl_secs(mut self, secs: i64) -> Self {
        self.roles_cache_ttl_secs = secs;
        self
    }

    pub fn with_jwks_refresh_interval_secs(mut self, secs: i64) -> Self {
        self.jwks_refresh_interval_secs = secs;
        self
    }

    pub fn with_revocation_refresh_interval_secs(mut self, secs: i64) -> Self {
        self.revocation_refresh_interval_secs = secs;
        self
    }

    pub fn with_fetch_timeout_secs(mut self, secs: i64) -> Self {
        self.fetch_timeout_secs = secs;
        self
    }

    pub fn with_base_uri_cache_ttl_secs(mut self, secs: i64) -> Self {
        self.base_uri_cache_ttl_secs = secs;
        self
    }

    pub fn roles_cache_ttl(&self) -> Duration {
        positive_or(self.roles_cache_ttl_secs, DEFAULT_ROLES_CACHE_TTL_SECS)
    }

    pub fn jwks_refresh_interval(&self) -> Duration {
        positive_or(
            self.jwks_refresh_interval_secs,
            DEFAULT_JWKS_REFRESH_INTERVAL_SECS,
        )
    }

    pub fn revocation_refresh_interval(&self) -> Duration {
        positive_or(
            self.revocation_refresh_interval_secs,
            DEFAULT_REVOCATION_REFRESH_INTERVAL_SECS,
        )
    }

    pub fn fetch_timeout(&self) -> Duration {
        positive_or(self.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS)
    }

    pub fn base_uri_cache_ttl(&self) -> Duration {
        positive_or(self.base_uri_cache_ttl_secs, DEFAULT_BASE_URI_CACHE_TTL_SECS)
    }
}

fn positive_or(secs: i64, default_secs: i64) -> Duration {
    let secs = if secs > 0 { secs } else { default_secs };
    Duration::from_secs(secs.unsigned_abs())
}
