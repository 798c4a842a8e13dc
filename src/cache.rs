//! ロール権限キャッシュとクライアントベース URI キャッシュ。

use crate::error::IamError;
use crate::fetcher::RoleLookup;
use moka::future::Cache;
use std::future::Future;
use std::time::Duration;

/// PermissionCache はロール ID → 付与権限を TTL 付きでキャッシュする。
///
/// 「ロール未登録」も `RoleLookup::NotFound` として TTL の間キャッシュする。
/// 同一ロールへの同時ミスは 1 回のロードにまとめられる。
#[derive(Clone)]
pub struct PermissionCache {
    cache: Cache<String, RoleLookup>,
}

impl PermissionCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// キャッシュ済みの値を返し、なければ `load` の結果をキャッシュして返す。
    /// `load` がエラーの場合はキャッシュせずにエラーを返す。
    pub async fn get_or_load<F>(&self, role_id: &str, load: F) -> Result<RoleLookup, IamError>
    where
        F: Future<Output = Result<RoleLookup, IamError>>,
    {
        self.cache
            .try_get_with_by_ref(role_id, load)
            .await
            .map_err(|e| (*e).clone())
    }
}

/// BaseUriCache はネームスペースごとにクライアントの登録ベース URI を TTL 付きでキャッシュする。
#[derive(Clone)]
pub struct BaseUriCache {
    cache: Cache<String, String>,
}

impl BaseUriCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub async fn get_or_load<F>(&self, namespace: &str, load: F) -> Result<String, IamError>
    where
        F: Future<Output = Result<String, IamError>>,
    {
        self.cache
            .try_get_with_by_ref(namespace, load)
            .await
            .map_err(|e| (*e).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Permission;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// 呼び出し回数を数えながら `lookup` を返すロード処理。
    fn counting_load(
        count: &Arc<AtomicU32>,
        lookup: RoleLookup,
    ) -> impl std::future::Future<Output = Result<RoleLookup, IamError>> {
        let count = count.clone();
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(lookup)
        }
    }

    #[tokio::test]
    async fn test_get_or_load_caches_result() {
        let cache = PermissionCache::new(Duration::from_secs(60), 100);
        let count = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let count = count.clone();
            let result = cache
                .get_or_load("mod", async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(RoleLookup::NotFound)
                })
                .await
                .unwrap();
            assert_eq!(result, RoleLookup::NotFound);
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_load_does_not_cache_errors() {
        let cache = PermissionCache::new(Duration::from_secs(60), 100);

        let err = cache
            .get_or_load("mod", async {
                Err(IamError::FetchFailed("connection refused".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, IamError::FetchFailed("connection refused".into()));

        // エラーはキャッシュされず、次の呼び出しで再ロードされる
        let count = Arc::new(AtomicU32::new(0));
        let lookup = RoleLookup::Found(vec![Permission::new("NAMESPACE:*", 2)]);
        let ok = cache
            .get_or_load("mod", counting_load(&count, lookup.clone()))
            .await
            .unwrap();
        assert_eq!(ok, lookup);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = PermissionCache::new(Duration::from_millis(50), 100);
        let count = Arc::new(AtomicU32::new(0));

        cache
            .get_or_load("mod", counting_load(&count, RoleLookup::NotFound))
            .await
            .unwrap();
        cache
            .get_or_load("mod", counting_load(&count, RoleLookup::NotFound))
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        cache
            .get_or_load("mod", counting_load(&count, RoleLookup::NotFound))
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_base_uri_cache() {
        let cache = BaseUriCache::new(Duration::from_secs(60));
        let count = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let count = count.clone();
            let uri = cache
                .get_or_load("accel", async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok("https://game.example.com".to_string())
                })
                .await
                .unwrap();
            assert_eq!(uri, "https://game.example.com");
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
