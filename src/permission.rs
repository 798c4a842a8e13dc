//! 権限モデル: リソースパターンとアクションビットマスクの照合。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// リソースパターンのセグメント区切り文字。
pub const RESOURCE_SEPARATOR: char = ':';

/// 任意の 1 セグメントに一致するワイルドカード。
pub const RESOURCE_WILDCARD: &str = "*";

/// アクションビット: 作成。
pub const ACTION_CREATE: u32 = 1;
/// アクションビット: 参照。
pub const ACTION_READ: u32 = 1 << 1;
/// アクションビット: 更新。
pub const ACTION_UPDATE: u32 = 1 << 2;
/// アクションビット: 削除。
pub const ACTION_DELETE: u32 = 1 << 3;

/// ロール権限のリソースに埋め込まれる、トークンのサブジェクトを表すプレースホルダ。
pub const USER_ID_PLACEHOLDER: &str = "{userId}";
/// ロール権限のリソースに埋め込まれる、トークンのネームスペースを表すプレースホルダ。
pub const NAMESPACE_PLACEHOLDER: &str = "{namespace}";

/// Permission はリソースパターンとアクションビットマスクの組を表す。
///
/// リソースは `NAMESPACE:{namespace}:USER:{userId}` のようなコロン区切りのパターン。
/// アクションが 0 の権限は何も許可しない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(rename = "Resource")]
    pub resource: String,

    #[serde(rename = "Action")]
    pub action: u32,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: u32) -> Self {
        Self {
            resource: resource.into(),
            action,
        }
    }

    /// プレースホルダ → 値のマッピングをリソースに適用した権限を返す。
    ///
    /// リソースを先頭から 1 回だけ走査し、各プレースホルダのすべての出現箇所を置換する。
    /// 置換後の値は再走査しないため、結果はマッピングの反復順序に依存しない。
    /// 同じ位置で複数のプレースホルダが一致する場合は長い方を優先する。
    #[must_use]
    pub fn with_bindings(&self, bindings: &HashMap<String, String>) -> Self {
        let mut pairs: Vec<(&str, &str)> = bindings
            .iter()
            .filter(|(placeholder, _)| !placeholder.is_empty())
            .map(|(placeholder, value)| (placeholder.as_str(), value.as_str()))
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

        let mut resource = String::with_capacity(self.resource.len());
        let mut rest = self.resource.as_str();
        'scan: while let Some(c) = rest.chars().next() {
            for &(placeholder, value) in &pairs {
                if let Some(tail) = rest.strip_prefix(placeholder) {
                    resource.push_str(value);
                    rest = tail;
                    continue 'scan;
                }
            }
            resource.push(c);
            rest = &rest[c.len_utf8()..];
        }

        Self {
            resource,
            action: self.action,
        }
    }

    /// この（付与側の）権限が要求権限を満たすかを判定する。
    ///
    /// リソースはセグメント単位で比較し、付与側の `*` は要求側の任意の 1 セグメントに一致する。
    /// セグメント数が異なる場合は一致しない。アクションは付与側が要求ビットをすべて含む必要がある。
    pub fn allows(&self, required: &Permission) -> bool {
        if required.action == 0 || required.action & self.action != required.action {
            return false;
        }
        resource_allowed(&self.resource, &required.resource)
    }
}

/// 付与権限の一覧のいずれかが要求権限を満たすかを判定する。
pub fn permission_allowed(granted: &[Permission], required: &Permission) -> bool {
    granted.iter().any(|g| g.allows(required))
}

fn resource_allowed(granted: &str, required: &str) -> bool {
    let mut granted_sections = granted.split(RESOURCE_SEPARATOR);
    let mut required_sections = required.split(RESOURCE_SEPARATOR);

    loop {
        match (granted_sections.next(), required_sections.next()) {
            (Some(g), Some(r)) => {
                if g != r && g != RESOURCE_WILDCARD {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}
