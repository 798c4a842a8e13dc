//! KeyStore: kid ごとの署名検証鍵を保持し、リフレッシュ時に丸ごと差し替える。

use crate::error::IamError;
use crate::fetcher::JwkKey;
use arc_swap::ArcSwap;
use jsonwebtoken::DecodingKey;
use std::collections::HashMap;
use std::sync::Arc;

/// KeyStore は現在の鍵セットを保持する。
///
/// 読み取り側は常に差し替え前または差し替え後の完全な鍵セットのいずれかを観測する。
pub struct KeyStore {
    keys: ArcSwap<HashMap<String, DecodingKey>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            keys: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// kid に対応する検証鍵を返す。
    pub fn get(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.load().get(kid).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.load().is_empty()
    }

    /// JWK 一覧から新しい鍵セットを構築し、現在の鍵セットと差し替える。
    ///
    /// 1 つでも検証鍵を構築できない JWK があれば差し替えずにエラーを返す。
    /// 同一 kid が重複した場合は後勝ちとする。
    pub fn replace(&self, jwks: &[JwkKey]) -> Result<(), IamError> {
        let mut keys = HashMap::with_capacity(jwks.len());
        for jwk in jwks {
            let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
                .map_err(|e| IamError::InvalidKey(format!("kid={}: {}", jwk.kid, e)))?;
            keys.insert(jwk.kid.clone(), key);
        }
        self.keys.store(Arc::new(keys));
        Ok(())
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}
