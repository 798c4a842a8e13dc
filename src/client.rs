//! IamClient: ローカル検証エンジン本体。
//!
//! 鍵セット・失効スナップショット・ロール権限キャッシュ・健全性状態を所有し、
//! バックグラウンドリフレッシュと検証 API を提供する。

use crate::cache::{BaseUriCache, PermissionCache};
use crate::claims::Claims;
use crate::config::IamConfig;
use crate::error::IamError;
use crate::fetcher::{
    with_timeout, ClientInfoFetcher, JwksFetcher, RevocationFetcher, RoleFetcher, TokenGranter,
};
use crate::health::{HealthReport, HealthState, RefreshKind};
use crate::keystore::KeyStore;
use crate::permission::Permission;
use crate::resolver::PermissionResolver;
use crate::revocation::{RevocationSnapshot, RevocationTracker};
use crate::scheduler::RefreshScheduler;
use crate::validator::{self, Validator};
use arc_swap::ArcSwapOption;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// IamFetchers は IamClient に注入する外部コラボレータ一式。
///
/// `token_granter` を省略した場合、`client_token_grant` はエラーになる。
#[derive(Clone)]
pub struct IamFetchers {
    pub jwks: Arc<dyn JwksFetcher>,
    pub revocation: Arc<dyn RevocationFetcher>,
    pub roles: Arc<dyn RoleFetcher>,
    pub client_info: Arc<dyn ClientInfoFetcher>,
    pub token_granter: Option<Arc<dyn TokenGranter>>,
}

/// バックグラウンドタスクと共有する状態。
struct Inner {
    config: IamConfig,
    fetchers: IamFetchers,
    keys: Arc<KeyStore>,
    revocation: Arc<RevocationTracker>,
    health: HealthState,
    client_token: Arc<ArcSwapOption<String>>,
}

/// IamClient はアクセストークンのローカル検証と権限判定を行う。
///
/// ```ignore
/// let client = IamClient::new(config, fetchers);
/// client.client_token_grant().await?;
/// client.start_local_validation().await?;
///
/// let claims = client.validate_and_parse_claims(token)?;
/// let allowed = client
///     .validate_permission(Some(&claims), &required, &bindings)
///     .await?;
/// ```
pub struct IamClient {
    inner: Arc<Inner>,
    validator: Validator,
    resolver: PermissionResolver,
    base_uri_cache: BaseUriCache,
    scheduler: RefreshScheduler,
    local_validation_active: AtomicBool,
    start_lock: Mutex<()>,
    token_grant_lock: Mutex<()>,
}

impl IamClient {
    pub fn new(config: IamConfig, fetchers: IamFetchers) -> Self {
        let keys = Arc::new(KeyStore::new());
        let revocation = Arc::new(RevocationTracker::new());
        let client_token = Arc::new(ArcSwapOption::empty());

        let resolver = PermissionResolver::new(
            PermissionCache::new(config.roles_cache_ttl(), config.roles_cache_capacity),
            fetchers.roles.clone(),
            config.fetch_timeout(),
            client_token.clone(),
        );
        let validator = Validator::new(keys.clone(), revocation.clone());
        let base_uri_cache = BaseUriCache::new(config.base_uri_cache_ttl());

        Self {
            inner: Arc::new(Inner {
                config,
                fetchers,
                keys,
                revocation,
                health: HealthState::new(),
                client_token,
            }),
            validator,
            resolver,
            base_uri_cache,
            scheduler: RefreshScheduler::new(),
            local_validation_active: AtomicBool::new(false),
            start_lock: Mutex::new(()),
            token_grant_lock: Mutex::new(()),
        }
    }

    /// クライアント自身のトークンを取得し、期限前の自動リフレッシュを開始する。
    ///
    /// 初回取得の失敗は呼び出し元に返す。以降の失敗は健全性状態に記録して再試行する。
    /// 同時に呼び出されてもリフレッシュタスクは 1 つだけ起動する。
    pub async fn client_token_grant(&self) -> Result<(), IamError> {
        let _guard = self.token_grant_lock.lock().await;

        let result = self.inner.grant_client_token().await;
        self.inner.health.record(RefreshKind::ClientToken, &result);
        let expires_in = result.inspect_err(|e| {
            tracing::error!(error = %e, "クライアントトークンの取得に失敗しました");
        })?;

        if self.inner.health.client_token_refresh_active() {
            return Ok(());
        }
        self.inner.health.set_client_token_refresh_active(true);

        let inner = self.inner.clone();
        self.scheduler.spawn_with_backoff(
            "client-token",
            expires_in,
            move || {
                let inner = inner.clone();
                async move {
                    let result = inner.grant_client_token().await;
                    inner.health.record(RefreshKind::ClientToken, &result);
                    result
                        .inspect_err(|e| {
                            tracing::warn!(error = %e, "クライアントトークンのリフレッシュに失敗しました");
                        })
                        .ok()
                }
            },
        );
        Ok(())
    }

    /// 現在のクライアントアクセストークンを返す。
    pub fn client_token(&self) -> Option<String> {
        self.inner
            .client_token
            .load_full()
            .map(|t| t.as_ref().clone())
    }

    /// 鍵セットと失効リストを取得し、定期リフレッシュを開始してローカル検証を有効化する。
    ///
    /// 初回取得に失敗した場合はエラーを返し、ローカル検証は無効のままとなる。
    /// すでに有効な場合は何もしない。同時に呼び出されても初期化は 1 回だけ行う。
    pub async fn start_local_validation(&self) -> Result<(), IamError> {
        let _guard = self.start_lock.lock().await;
        if self.local_validation_active.load(Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.inner.refresh_jwks().await;
        self.inner.health.record(RefreshKind::Jwks, &result);
        result.inspect_err(|e| {
            tracing::error!(error = %e, "JWKS の取得に失敗しました");
        })?;

        let result = self.inner.refresh_revocation_list().await;
        self.inner.health.record(RefreshKind::RevocationList, &result);
        result.inspect_err(|e| {
            tracing::error!(error = %e, "失効リストの取得に失敗しました");
        })?;

        let inner = self.inner.clone();
        self.scheduler.spawn_periodic(
            "jwks",
            self.inner.config.jwks_refresh_interval(),
            move || {
                let inner = inner.clone();
                async move {
                    let result = inner.refresh_jwks().await;
                    inner.health.record(RefreshKind::Jwks, &result);
                }
            },
        );

        let inner = self.inner.clone();
        self.scheduler.spawn_periodic(
            "revocation-list",
            self.inner.config.revocation_refresh_interval(),
            move || {
                let inner = inner.clone();
                async move {
                    let result = inner.refresh_revocation_list().await;
                    inner.health.record(RefreshKind::RevocationList, &result);
                }
            },
        );

        self.local_validation_active.store(true, Ordering::SeqCst);
        tracing::info!(keys = self.inner.keys.len(), "ローカル検証を開始しました");
        Ok(())
    }

    /// アクセストークンをローカルで検証し、Claims を返す。
    pub fn validate_and_parse_claims(&self, token: &str) -> Result<Claims, IamError> {
        if !self.local_validation_active.load(Ordering::SeqCst) {
            return Err(IamError::NotActivated);
        }
        self.validator.validate_and_parse_claims(token)
    }

    /// 要求権限が Claims で許可されるかを判定する。
    ///
    /// 例: `required = {Resource: "NAMESPACE:{namespace}:USER:{userId}", Action: 2}`,
    /// `bindings = {"{namespace}": "accel", "{userId}": "42"}`
    pub async fn validate_permission(
        &self,
        claims: Option<&Claims>,
        required: &Permission,
        bindings: &HashMap<String, String>,
    ) -> Result<bool, IamError> {
        self.resolver
            .validate_permission(claims, required, bindings)
            .await
    }

    pub fn validate_role(&self, required_role_id: &str, claims: &Claims) -> bool {
        self.resolver.validate_role(required_role_id, claims)
    }

    /// aud をクライアントの登録ベース URI と照合する。
    ///
    /// aud がないトークンは検証対象外として許可する。
    pub async fn validate_audience(&self, claims: &Claims) -> Result<(), IamError> {
        if claims.aud.is_none() {
            tracing::debug!(sub = %claims.sub, "aud がないためオーディエンス検証をスキップします");
            return Ok(());
        }

        let inner = &self.inner;
        let base_uri = self
            .base_uri_cache
            .get_or_load(&claims.namespace, async {
                let bearer = inner.client_token.load_full().map(|t| t.as_ref().clone());
                with_timeout(
                    "client information",
                    inner.config.fetch_timeout(),
                    inner.fetchers.client_info.fetch_base_uri(
                        &claims.namespace,
                        &inner.config.client_id,
                        bearer,
                    ),
                )
                .await
            })
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, "クライアント情報の取得に失敗しました");
            })?;

        validator::check_audience(claims, &base_uri)
    }

    pub fn validate_scope(&self, claims: &Claims, required_scope: &str) -> Result<(), IamError> {
        validator::validate_scope(claims, required_scope)
    }

    /// JWKS・失効リスト（・有効ならクライアントトークン）のリフレッシュにエラーがなければ `true`。
    pub fn health_check(&self) -> bool {
        self.inner.health.is_healthy()
    }

    pub fn health_report(&self) -> HealthReport {
        self.inner.health.report()
    }

    /// 実行中のバックグラウンドリフレッシュタスク数。
    pub fn refresh_task_count(&self) -> usize {
        self.scheduler.task_count()
    }

    /// 全リフレッシュタスクを停止し、終了を待つ。
    ///
    /// 停止後のトークン検証は `NotActivated` となる。
    /// `start_local_validation` / `client_token_grant` を再度呼び出せば再開できる。
    pub async fn shutdown(&self) {
        let _start_guard = self.start_lock.lock().await;
        let _grant_guard = self.token_grant_lock.lock().await;

        self.scheduler.shutdown().await;
        self.local_validation_active.store(false, Ordering::SeqCst);
        self.inner.health.set_client_token_refresh_active(false);
        tracing::info!("IAM クライアントを停止しました");
    }
}

impl Inner {
    async fn refresh_jwks(&self) -> Result<(), IamError> {
        let jwks = with_timeout(
            "jwks",
            self.config.fetch_timeout(),
            self.fetchers.jwks.fetch_keys(),
        )
        .await;

        let result = jwks.and_then(|jwks| self.keys.replace(&jwks));
        match &result {
            Ok(()) => tracing::debug!(keys = self.keys.len(), "JWKS を更新しました"),
            Err(e) => tracing::warn!(error = %e, "JWKS の更新に失敗しました。既存の鍵セットを使用します"),
        }
        result
    }

    async fn refresh_revocation_list(&self) -> Result<(), IamError> {
        let result = with_timeout(
            "revocation list",
            self.config.fetch_timeout(),
            self.fetchers.revocation.fetch_revocation_list(),
        )
        .await;

        match result {
            Ok(list) => {
                let snapshot = RevocationSnapshot::new(list.revoked_tokens, list.revoked_users);
                tracing::debug!(
                    revoked_users = snapshot.revoked_user_count(),
                    "失効リストを更新しました"
                );
                self.revocation.replace(snapshot);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "失効リストの更新に失敗しました。既存のスナップショットを使用します");
                Err(e)
            }
        }
    }

    /// トークンを取得して保存し、有効期限を返す。
    async fn grant_client_token(&self) -> Result<std::time::Duration, IamError> {
        let granter = self
            .fetchers
            .token_granter
            .as_ref()
            .ok_or_else(|| IamError::FetchFailed("token granter is not configured".into()))?;

        let token = with_timeout(
            "client token",
            self.config.fetch_timeout(),
            granter.grant(
                &self.config.client_id,
                self.config.client_secret.expose_secret(),
            ),
        )
        .await?;

        tracing::debug!(
            client_id = %self.config.client_id,
            expires_in = token.expires_in.as_secs(),
            "クライアントトークンを取得しました"
        );
        self.client_token.store(Some(Arc::new(token.access_token)));
        Ok(token.expires_in)
    }
}
