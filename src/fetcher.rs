//! 外部コラボレータ（鍵セット・失効リスト・ロール権限・クライアント情報・トークン付与）のトレイト。
//!
//! HTTP 通信と JSON デコードは実装側の責務とし、このクレートは取得結果の型だけを扱う。

use crate::error::IamError;
use crate::permission::Permission;
use crate::revocation::{BloomFilter, RevokedUser};
use async_trait::async_trait;
use std::time::Duration;

/// JwkKey は取得した JWK 鍵の公開情報（RSA の n / e を base64url で保持する）。
#[derive(Debug, Clone)]
pub struct JwkKey {
    pub kid: String,
    pub n: String,
    pub e: String,
}

/// RevocationList は失効リストエンドポイントの取得結果を表す。
#[derive(Debug, Clone)]
pub struct RevocationList {
    /// 失効トークンのブルームフィルタ
    pub revoked_tokens: BloomFilter,

    /// 失効ユーザーと失効時刻
    pub revoked_users: Vec<RevokedUser>,
}

/// RoleLookup はロール権限取得の結果を表す。
/// ロールが未登録の場合は `NotFound` であり、エラーではない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleLookup {
    Found(Vec<Permission>),
    NotFound,
}

/// ClientToken は Client Credentials フローで取得したクライアント自身のアクセストークン。
#[derive(Debug, Clone)]
pub struct ClientToken {
    pub access_token: String,
    pub expires_in: Duration,
}

/// JwksFetcher は JWKS エンドポイントからの鍵取得を抽象化するトレイト。
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch_keys(&self) -> Result<Vec<JwkKey>, IamError>;
}

/// RevocationFetcher は失効リストの取得を抽象化するトレイト。
#[async_trait]
pub trait RevocationFetcher: Send + Sync {
    async fn fetch_revocation_list(&self) -> Result<RevocationList, IamError>;
}

/// RoleFetcher はロール ID から付与権限を取得するトレイト。
#[async_trait]
pub trait RoleFetcher: Send + Sync {
    /// `bearer_token` はクライアント自身のアクセストークン（未取得なら `None`）。
    async fn fetch_role_permissions(
        &self,
        role_id: &str,
        bearer_token: Option<String>,
    ) -> Result<RoleLookup, IamError>;
}

/// ClientInfoFetcher はクライアントの登録ベース URI を取得するトレイト。
#[async_trait]
pub trait ClientInfoFetcher: Send + Sync {
    async fn fetch_base_uri(
        &self,
        namespace: &str,
        client_id: &str,
        bearer_token: Option<String>,
    ) -> Result<String, IamError>;
}

/// TokenGranter は Client Credentials フローでトークンを取得するトレイト。
#[async_trait]
pub trait TokenGranter: Send + Sync {
    async fn grant(&self, client_id: &str, client_secret: &str) -> Result<ClientToken, IamError>;
}

/// フェッチを `timeout` で打ち切る。タイムアウト時は `IamError::Timeout` を返す。
pub(crate) async fn with_timeout<T, F>(what: &str, timeout: Duration, fetch: F) -> Result<T, IamError>
where
    F: std::future::Future<Output = Result<T, IamError>>,
{
    tokio::time::timeout(timeout, fetch)
        .await
        .map_err(|_| IamError::Timeout(format!("{what} ({}ms)", timeout.as_millis())))?
}
