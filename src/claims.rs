//! アクセストークンの JWT Claims 構造体。

use crate::permission::Permission;
use serde::{Deserialize, Serialize};

/// jflags: メールアドレス確認済み。
pub const USER_STATUS_EMAIL_VERIFIED: u32 = 1;
/// jflags: 電話番号確認済み。
pub const USER_STATUS_PHONE_VERIFIED: u32 = 1 << 1;
/// jflags: 匿名ユーザー。
pub const USER_STATUS_ANONYMOUS: u32 = 1 << 2;

/// Ban はトークンに付与された有効な BAN を表す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    #[serde(rename = "Ban")]
    pub ban: String,

    #[serde(rename = "EndDate", default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// Claims は検証済みアクセストークンのペイロードを表す。
///
/// 検証後は不変であり、IAM クライアントが書き換えることはない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// ユーザー識別子
    pub sub: String,

    /// 発行時刻（Unix タイムスタンプ）
    pub iat: i64,

    /// 有効期限（Unix タイムスタンプ）
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// JWT ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// トークンが属するネームスペース
    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// ロール ID（トークン上の順序を保持する）
    #[serde(default)]
    pub roles: Vec<String>,

    /// 直接付与された権限
    #[serde(default)]
    pub permissions: Vec<Permission>,

    /// 有効な BAN の一覧
    #[serde(default)]
    pub bans: Vec<Ban>,

    /// 確認状態・匿名状態のビットフラグ
    #[serde(default)]
    pub jflags: u32,

    /// スペース区切りのスコープ
    #[serde(default)]
    pub scope: String,

    /// トークンの対象オーディエンス。Claim 自体がない場合は `None`。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
}

/// Audience は JWT の aud Claim を表す。
/// 文字列または文字列配列のどちらも受け付ける。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Audience(pub Vec<String>);

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de;

        struct AudienceVisitor;

        impl<'de> de::Visitor<'de> for AudienceVisitor {
            type Value = Audience;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or array of strings")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Audience(vec![v.to_string()]))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut values = Vec::new();
                while let Some(v) = seq.next_element::<String>()? {
                    values.push(v);
                }
                Ok(Audience(values))
            }
        }

        deserializer.deserialize_any(AudienceVisitor)
    }
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|a| a == value)
    }
}

impl Claims {
    /// スコープを空白で分割して返す。
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }

    /// 指定スコープを完全一致で含むかを返す。
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }

    /// 指定ロール ID を持つかを返す。
    pub fn has_role(&self, role_id: &str) -> bool {
        self.roles.iter().any(|r| r == role_id)
    }

    /// 指定種別の BAN が存在するかを返す。
    pub fn has_ban(&self, ban_type: &str) -> bool {
        self.bans.iter().any(|b| b.ban == ban_type)
    }

    pub fn email_verified(&self) -> bool {
        self.jflags & USER_STATUS_EMAIL_VERIFIED == USER_STATUS_EMAIL_VERIFIED
    }

    pub fn phone_verified(&self) -> bool {
        self.jflags & USER_STATUS_PHONE_VERIFIED == USER_STATUS_PHONE_VERIFIED
    }

    pub fn is_anonymous(&self) -> bool {
        self.jflags & USER_STATUS_ANONYMOUS == USER_STATUS_ANONYMOUS
    }
}

impl std::fmt::Display for Claims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Claims{{sub={}, namespace={}, roles={:?}, aud={:?}}}",
            self.sub,
            self.namespace,
            self.roles,
            self.aud.as_ref().map(|a| a.0.as_slice()),
        )
    }
}
