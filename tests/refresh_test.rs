use async_trait::async_trait;
use k1s0_iam_client::{
    BloomFilter, ClientInfoFetcher, ClientToken, HealthStatus, IamClient, IamConfig, IamError,
    IamFetchers, JwkKey, JwksFetcher, RevocationFetcher, RevocationList, RoleFetcher, RoleLookup,
    TokenGranter,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// 公開指数 65537 の 2048 bit RSA 公開鍵
const TEST_N: &str = "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw";

/// 失敗・無応答を切り替えられるフェッチャー群。
#[derive(Default)]
struct Switchable {
    fail: AtomicBool,
    hang: AtomicBool,
    count: AtomicU32,
}

impl Switchable {
    async fn call(&self) -> Result<(), IamError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        // 同時呼び出しが交互に進むよう一度制御を戻す
        tokio::task::yield_now().await;
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(IamError::FetchFailed("HTTP 503".into()));
        }
        Ok(())
    }

    fn calls(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

struct Jwks(Arc<Switchable>);

#[async_trait]
impl JwksFetcher for Jwks {
    async fn fetch_keys(&self) -> Result<Vec<JwkKey>, IamError> {
        self.0.call().await?;
        Ok(vec![JwkKey {
            kid: "key-1".into(),
            n: TEST_N.into(),
            e: "AQAB".into(),
        }])
    }
}

struct Revocation(Arc<Switchable>);

#[async_trait]
impl RevocationFetcher for Revocation {
    async fn fetch_revocation_list(&self) -> Result<RevocationList, IamError> {
        self.0.call().await?;
        Ok(RevocationList {
            revoked_tokens: BloomFilter::empty(),
            revoked_users: vec![],
        })
    }
}

struct Granter(Arc<Switchable>);

#[async_trait]
impl TokenGranter for Granter {
    async fn grant(&self, client_id: &str, _client_secret: &str) -> Result<ClientToken, IamError> {
        self.0.call().await?;
        Ok(ClientToken {
            access_token: format!("{client_id}-token-{}", self.0.calls()),
            expires_in: Duration::from_secs(10),
        })
    }
}

struct NoRoles;

#[async_trait]
impl RoleFetcher for NoRoles {
    async fn fetch_role_permissions(
        &self,
        _role_id: &str,
        _bearer_token: Option<String>,
    ) -> Result<RoleLookup, IamError> {
        Ok(RoleLookup::NotFound)
    }
}

struct NoClientInfo;

#[async_trait]
impl ClientInfoFetcher for NoClientInfo {
    async fn fetch_base_uri(
        &self,
        _namespace: &str,
        _client_id: &str,
        _bearer_token: Option<String>,
    ) -> Result<String, IamError> {
        Err(IamError::FetchFailed("not configured".into()))
    }
}

struct Fixture {
    client: IamClient,
    jwks: Arc<Switchable>,
    revocation: Arc<Switchable>,
    granter: Arc<Switchable>,
}

fn fixture() -> Fixture {
    let jwks = Arc::new(Switchable::default());
    let revocation = Arc::new(Switchable::default());
    let granter = Arc::new(Switchable::default());

    let config = IamConfig::new("https://iam.example.com", "svc", "secret")
        .with_jwks_refresh_interval_secs(10)
        .with_revocation_refresh_interval_secs(10)
        .with_fetch_timeout_secs(1);

    let fetchers = IamFetchers {
        jwks: Arc::new(Jwks(jwks.clone())),
        revocation: Arc::new(Revocation(revocation.clone())),
        roles: Arc::new(NoRoles),
        client_info: Arc::new(NoClientInfo),
        token_granter: Some(Arc::new(Granter(granter.clone()))),
    };

    Fixture {
        client: IamClient::new(config, fetchers),
        jwks,
        revocation,
        granter,
    }
}

#[tokio::test(start_paused = true)]
async fn test_jwks_failure_is_sticky_until_next_success() {
    let f = fixture();
    f.client.start_local_validation().await.unwrap();
    assert!(f.client.health_check());

    f.jwks.fail.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!f.client.health_check());

    let report = f.client.health_report();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report.checks["jwks"]
        .message
        .as_deref()
        .unwrap()
        .contains("HTTP 503"));
    assert_eq!(report.checks["revocation-list"].status, HealthStatus::Healthy);

    // 次のサイクルが成功するまで不健全のまま
    f.jwks.fail.store(false, Ordering::SeqCst);
    assert!(!f.client.health_check());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(f.client.health_check());

    f.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_hanging_fetch_times_out() {
    let f = fixture();
    f.client.start_local_validation().await.unwrap();

    f.revocation.hang.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(12)).await;

    let report = f.client.health_report();
    assert_eq!(
        report.checks["revocation-list"].status,
        HealthStatus::Unhealthy
    );
    assert!(report.checks["revocation-list"]
        .message
        .as_deref()
        .unwrap()
        .contains("revocation list"));

    f.revocation.hang.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(f.client.health_check());

    f.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_leaves_validation_inactive() {
    let f = fixture();
    f.jwks.fail.store(true, Ordering::SeqCst);

    let result = f.client.start_local_validation().await;
    assert_eq!(result, Err(IamError::FetchFailed("HTTP 503".into())));
    assert_eq!(
        f.client.validate_and_parse_claims("a.b.c"),
        Err(IamError::NotActivated)
    );

    // 失敗後の再試行で有効化できる
    f.jwks.fail.store(false, Ordering::SeqCst);
    f.client.start_local_validation().await.unwrap();
    assert!(matches!(
        f.client.validate_and_parse_claims("a.b.c"),
        Err(IamError::MalformedToken(_))
    ));

    f.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_client_token_refresh_failure_affects_health() {
    let f = fixture();
    f.client.start_local_validation().await.unwrap();
    f.client.client_token_grant().await.unwrap();
    assert_eq!(f.client.client_token().as_deref(), Some("svc-token-1"));

    // 有効期限 10 秒の 8 割で再取得する
    f.granter.fail.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(8_500)).await;
    assert_eq!(f.granter.calls(), 2);
    assert!(!f.client.health_check());
    assert_eq!(f.client.client_token().as_deref(), Some("svc-token-1"));

    // 1 秒のバックオフ後に再試行して回復する
    f.granter.fail.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(f.granter.calls(), 3);
    assert!(f.client.health_check());
    assert_eq!(f.client.client_token().as_deref(), Some("svc-token-3"));

    f.client.shutdown().await;
    assert!(f.client.health_check());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_refresh() {
    let f = fixture();
    f.client.start_local_validation().await.unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;
    let jwks_calls = f.jwks.calls();
    assert_eq!(jwks_calls, 3);

    f.client.shutdown().await;
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(f.jwks.calls(), jwks_calls);
    assert_eq!(f.revocation.calls(), 3);
    assert_eq!(f.client.refresh_task_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_resumes_after_restart() {
    let f = fixture();
    f.client.start_local_validation().await.unwrap();
    f.client.shutdown().await;
    assert_eq!(
        f.client.validate_and_parse_claims("a.b.c"),
        Err(IamError::NotActivated)
    );

    f.client.start_local_validation().await.unwrap();
    assert_eq!(f.jwks.calls(), 2);
    assert_eq!(f.client.refresh_task_count(), 2);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(f.jwks.calls(), 3);

    f.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_spawn_tasks_once() {
    let f = fixture();

    let (first, second) = tokio::join!(
        f.client.start_local_validation(),
        f.client.start_local_validation()
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(f.client.refresh_task_count(), 2);
    assert_eq!(f.jwks.calls(), 1);

    let (first, second) = tokio::join!(
        f.client.client_token_grant(),
        f.client.client_token_grant()
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(f.client.refresh_task_count(), 3);
    assert_eq!(f.granter.calls(), 2);

    // 鍵セットのリフレッシュは 1 系統だけが動く
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(f.jwks.calls(), 2);

    f.client.shutdown().await;
}
