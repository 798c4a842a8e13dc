//! Validator: 署名検証・失効チェック・オーディエンス・スコープ検証。

use crate::claims::Claims;
use crate::error::IamError;
use crate::keystore::KeyStore;
use crate::revocation::RevocationTracker;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use std::sync::Arc;

/// Validator はアクセストークンをローカルで検証する。
///
/// 鍵セットと失効スナップショットは読み取るだけで、リフレッシュは `RefreshScheduler` が行う。
pub struct Validator {
    keys: Arc<KeyStore>,
    revocation: Arc<RevocationTracker>,
    validation: Validation,
}

impl Validator {
    pub fn new(keys: Arc<KeyStore>, revocation: Arc<RevocationTracker>) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        // aud は validate_audience で別途検証する
        validation.validate_aud = false;
        validation.validate_nbf = true;

        Self {
            keys,
            revocation,
            validation,
        }
    }

    /// トークンを検証し Claims を返す。
    ///
    /// 構造解析 → kid による鍵検索 → 署名・時刻検証 → ユーザー失効 → トークン失効 の順に判定する。
    pub fn validate_and_parse_claims(&self, token: &str) -> Result<Claims, IamError> {
        let header = decode_header(token).map_err(|e| IamError::MalformedToken(e.to_string()))?;

        let kid = header
            .kid
            .ok_or_else(|| IamError::MalformedToken("missing kid in header".into()))?;

        let key = self
            .keys
            .get(&kid)
            .ok_or_else(|| IamError::UnknownKey(kid.clone()))?;

        let claims = decode::<Claims>(token, &key, &self.validation)
            .map_err(|e| {
                tracing::debug!(kid = %kid, error = %e, "JWT 検証に失敗しました");
                IamError::from(e)
            })?
            .claims;

        let snapshot = self.revocation.snapshot();
        if snapshot.user_revoked(&claims.sub, claims.iat) {
            tracing::debug!(sub = %claims.sub, iat = claims.iat, "失効済みユーザーのトークンです");
            return Err(IamError::UserRevoked);
        }
        if snapshot.token_revoked(token) {
            tracing::debug!(sub = %claims.sub, "失効済みトークンです");
            return Err(IamError::TokenRevoked);
        }

        Ok(claims)
    }
}

/// aud のいずれかがベース URI と完全一致するかを検証する。
pub fn check_audience(claims: &Claims, base_uri: &str) -> Result<(), IamError> {
    match claims.aud {
        Some(ref aud) if aud.contains(base_uri) => Ok(()),
        Some(_) => Err(IamError::AudienceMismatch),
        None => Ok(()),
    }
}

/// 要求スコープがトークンのスコープに完全一致で含まれるかを検証する。
pub fn validate_scope(claims: &Claims, required_scope: &str) -> Result<(), IamError> {
    if claims.has_scope(required_scope) {
        Ok(())
    } else {
        Err(IamError::InsufficientScope)
    }
}
