//! PermissionResolver: 直接権限とロール経由の権限で要求権限を判定する。

use crate::cache::PermissionCache;
use crate::claims::Claims;
use crate::error::IamError;
use crate::fetcher::{with_timeout, RoleFetcher, RoleLookup};
use crate::permission::{
    permission_allowed, Permission, NAMESPACE_PLACEHOLDER, USER_ID_PLACEHOLDER,
};
use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// PermissionResolver は Claims と要求権限から許可・拒否を判定する。
///
/// ロールの付与権限は `PermissionCache` 経由で取得し、キャッシュミス時のみ外部フェッチを行う。
pub struct PermissionResolver {
    cache: PermissionCache,
    fetcher: Arc<dyn RoleFetcher>,
    fetch_timeout: Duration,
    bearer_token: Arc<ArcSwapOption<String>>,
}

impl PermissionResolver {
    pub fn new(
        cache: PermissionCache,
        fetcher: Arc<dyn RoleFetcher>,
        fetch_timeout: Duration,
        bearer_token: Arc<ArcSwapOption<String>>,
    ) -> Self {
        Self {
            cache,
            fetcher,
            fetch_timeout,
            bearer_token,
        }
    }

    /// 要求権限が Claims で許可されるかを判定する。
    ///
    /// `bindings` は要求権限のリソース中のプレースホルダ（例: `{namespace}`）を置換する値。
    /// Claims がない場合はエラーではなく拒否（`Ok(false)`）とする。
    /// ロール未登録はそのロールを読み飛ばし、それ以外のフェッチエラーは判定を中断して返す。
    pub async fn validate_permission(
        &self,
        claims: Option<&Claims>,
        required: &Permission,
        bindings: &HashMap<String, String>,
    ) -> Result<bool, IamError> {
        let Some(claims) = claims else {
            return Ok(false);
        };

        let required = required.with_bindings(bindings);
        if permission_allowed(&claims.permissions, &required) {
            return Ok(true);
        }

        for role_id in &claims.roles {
            let granted = match self.role_permissions(role_id).await? {
                RoleLookup::Found(permissions) => permissions,
                RoleLookup::NotFound => {
                    tracing::debug!(role_id = %role_id, "未登録のロールを読み飛ばします");
                    continue;
                }
            };

            let granted = apply_claims_context(&granted, claims);
            if permission_allowed(&granted, &required) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// 要求ロールが Claims のロール一覧に含まれるかを判定する。
    pub fn validate_role(&self, required_role_id: &str, claims: &Claims) -> bool {
        claims.has_role(required_role_id)
    }

    async fn role_permissions(&self, role_id: &str) -> Result<RoleLookup, IamError> {
        self.cache
            .get_or_load(role_id, async {
                tracing::debug!(role_id = %role_id, "ロール権限を取得します");
                let bearer = self.bearer_token.load_full().map(|t| t.as_ref().clone());
                with_timeout(
                    "role permissions",
                    self.fetch_timeout,
                    self.fetcher.fetch_role_permissions(role_id, bearer),
                )
                .await
                .inspect_err(|e| {
                    tracing::warn!(role_id = %role_id, error = %e, "ロール権限の取得に失敗しました");
                })
            })
            .await
    }
}

/// ロール権限のリソース中のプレースホルダをトークン自身の値で置換する。
fn apply_claims_context(granted: &[Permission], claims: &Claims) -> Vec<Permission> {
    granted
        .iter()
        .map(|p| Permission {
            resource: p
                .resource
                .replace(USER_ID_PLACEHOLDER, &claims.sub)
                .replace(NAMESPACE_PLACEHOLDER, &claims.namespace),
            action: p.action,
        })
        .collect()
}
