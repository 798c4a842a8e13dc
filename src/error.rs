//! IAM クライアントのエラー定義。

/// IamError はトークン検証・権限解決・外部フェッチで発生するエラーを表す。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IamError {
    /// ローカル検証が開始されていない。
    #[error("ローカル検証が有効化されていません。start_local_validation() を呼び出してください")]
    NotActivated,

    /// トークンの構造・ヘッダー・Claims を解析できなかった。
    #[error("不正なトークン: {0}")]
    MalformedToken(String),

    /// ヘッダーの kid に対応する鍵が鍵セットに存在しない。
    #[error("未知の kid: {0}")]
    UnknownKey(String),

    /// 署名検証に失敗した。
    #[error("署名検証失敗: {0}")]
    InvalidSignature(String),

    /// トークンの有効期限が切れている。
    #[error("トークンの有効期限が切れました")]
    Expired,

    /// ユーザー単位で失効済み。
    #[error("ユーザーは失効済みです")]
    UserRevoked,

    /// トークン単位で失効済み。
    #[error("トークンは失効済みです")]
    TokenRevoked,

    /// aud がクライアントのベース URI と一致しない。
    #[error("オーディエンスがクライアントのベース URI と一致しません")]
    AudienceMismatch,

    /// 要求スコープがトークンに含まれていない。
    #[error("スコープが不足しています")]
    InsufficientScope,

    /// 取得した鍵から検証鍵を構築できなかった。
    #[error("不正な検証鍵: {0}")]
    InvalidKey(String),

    /// 外部フェッチがタイムアウトした。
    #[error("タイムアウト: {0}")]
    Timeout(String),

    /// 外部フェッチに失敗した。
    #[error("フェッチ失敗: {0}")]
    FetchFailed(String),
}

impl From<jsonwebtoken::errors::Error> for IamError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => IamError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::ImmatureSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::Crypto(_) => IamError::InvalidSignature(err.to_string()),
            _ => IamError::MalformedToken(err.to_string()),
        }
    }
}
