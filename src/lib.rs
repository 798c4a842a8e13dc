//! k1s0-iam-client: リソースサーバー用のローカルトークン検証 + ロール権限解決ライブラリ
//!
//! 署名鍵セット・失効リスト・ロール権限をローカルにキャッシュし、
//! リクエストごとの IAM 問い合わせなしにアクセストークンの検証と認可判定を行う。
//! 鍵セットと失効リストはバックグラウンドで定期的にリフレッシュされる。
//!
//! # 使い方
//!
//! ```ignore
//! use k1s0_iam_client::{IamClient, IamConfig, IamFetchers, Permission, ACTION_READ};
//! use std::collections::HashMap;
//!
//! let config = IamConfig::new("https://iam.example.com", "my-service", "my-secret");
//! let client = IamClient::new(config, fetchers);
//!
//! client.client_token_grant().await?;
//! client.start_local_validation().await?;
//!
//! let claims = client.validate_and_parse_claims("eyJ...")?;
//!
//! let required = Permission::new("NAMESPACE:{namespace}:USER:{userId}", ACTION_READ);
//! let bindings = HashMap::from([
//!     ("{namespace}".to_string(), "accel".to_string()),
//!     ("{userId}".to_string(), claims.sub.clone()),
//! ]);
//! let allowed = client.validate_permission(Some(&claims), &required, &bindings).await?;
//! ```

pub mod cache;
pub mod claims;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod health;
pub mod keystore;
pub mod permission;
pub mod resolver;
pub mod revocation;
pub mod scheduler;
pub mod validator;

pub use claims::{
    Audience, Ban, Claims, USER_STATUS_ANONYMOUS, USER_STATUS_EMAIL_VERIFIED,
    USER_STATUS_PHONE_VERIFIED,
};
pub use client::{IamClient, IamFetchers};
pub use config::IamConfig;
pub use error::IamError;
pub use fetcher::{
    ClientInfoFetcher, ClientToken, JwkKey, JwksFetcher, RevocationFetcher, RevocationList,
    RoleFetcher, RoleLookup, TokenGranter,
};
pub use health::{HealthReport, HealthStatus, RefreshKind};
pub use permission::{
    Permission, ACTION_CREATE, ACTION_DELETE, ACTION_READ, ACTION_UPDATE,
};
pub use revocation::{BloomFilter, RevokedUser};
