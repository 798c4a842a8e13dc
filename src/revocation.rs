//! 失効管理: トークン単位のブルームフィルタとユーザー単位の失効時刻。

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// BloomFilter は失効トークンの確率的集合を表す。
///
/// 偽陰性はなく、偽陽性率は構築時のサイズで決まる。
/// ハッシュは SHA-256 ダイジェストの前半・後半 64 bit による二重ハッシュ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// 想定要素数と偽陽性率から最適サイズのフィルタを生成する。
    ///
    /// m = -n*ln(p) / (ln 2)^2, k = (m/n) * ln 2
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        let words = num_bits.div_ceil(64);

        Self {
            bits: vec![0; usize::try_from(words).unwrap_or(usize::MAX)],
            num_bits: words * 64,
            num_hashes,
        }
    }

    /// 失効リストで配布されたビット列とハッシュ関数の数からフィルタを復元する。
    /// ビット列が空の場合は何も含まないフィルタになる。
    pub fn from_parts(bits: Vec<u64>, num_hashes: u32) -> Self {
        let num_bits = bits.len() as u64 * 64;
        Self {
            bits,
            num_bits,
            num_hashes: num_hashes.max(1),
        }
    }

    /// 空のフィルタ（常に「含まない」と判定する）。
    pub fn empty() -> Self {
        Self::from_parts(Vec::new(), 1)
    }

    pub fn bits(&self) -> &[u64] {
        &self.bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn insert(&mut self, item: &str) {
        if self.num_bits == 0 {
            return;
        }
        for index in self.indexes(item) {
            self.bits[index / 64] |= 1u64 << (index % 64);
        }
    }

    /// 要素が含まれる可能性があれば `true`、確実に含まれなければ `false` を返す。
    pub fn might_contain(&self, item: &str) -> bool {
        if self.num_bits == 0 {
            return false;
        }
        self.indexes(item)
            .all(|index| self.bits[index / 64] & (1u64 << (index % 64)) != 0)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn indexes(&self, item: &str) -> impl Iterator<Item = usize> {
        let digest = Sha256::digest(item.as_bytes());
        let mut h1 = [0u8; 8];
        let mut h2 = [0u8; 8];
        h1.copy_from_slice(&digest[..8]);
        h2.copy_from_slice(&digest[8..16]);
        let h1 = u64::from_le_bytes(h1);
        let h2 = u64::from_le_bytes(h2) | 1;
        let num_bits = self.num_bits;

        (0..u64::from(self.num_hashes))
            .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits) as usize)
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::empty()
    }
}

/// RevokedUser は失効ユーザーと失効時刻の組を表す。
/// 失効時刻以前に発行されたトークンはすべて無効となる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedUser {
    pub id: String,
    pub revoked_at: DateTime<Utc>,
}

/// RevocationSnapshot は失効状態の不変スナップショット。
#[derive(Debug, Clone, Default)]
pub struct RevocationSnapshot {
    revoked_tokens: BloomFilter,
    revoked_users: HashMap<String, DateTime<Utc>>,
}

impl RevocationSnapshot {
    /// 同一ユーザーが複数回現れた場合は最も新しい失効時刻を採用する。
    pub fn new(revoked_tokens: BloomFilter, revoked_users: Vec<RevokedUser>) -> Self {
        let mut users: HashMap<String, DateTime<Utc>> = HashMap::with_capacity(revoked_users.len());
        for user in revoked_users {
            users
                .entry(user.id)
                .and_modify(|at| *at = (*at).max(user.revoked_at))
                .or_insert(user.revoked_at);
        }
        Self {
            revoked_tokens,
            revoked_users: users,
        }
    }

    /// 発行時刻 `issued_at` のトークンがユーザー単位で失効しているかを返す。
    pub fn user_revoked(&self, subject: &str, issued_at: i64) -> bool {
        self.revoked_users
            .get(subject)
            .is_some_and(|revoked_at| revoked_at.timestamp() >= issued_at)
    }

    pub fn token_revoked(&self, token: &str) -> bool {
        self.revoked_tokens.might_contain(token)
    }

    pub fn revoked_user_count(&self) -> usize {
        self.revoked_users.len()
    }
}

/// RevocationTracker は現在の失効スナップショットを保持し、リフレッシュ時に丸ごと差し替える。
pub struct RevocationTracker {
    snapshot: ArcSwap<RevocationSnapshot>,
}

impl RevocationTracker {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RevocationSnapshot::default()),
        }
    }

    /// 現在のスナップショットを返す。
    /// 以降の差し替えの影響を受けないため、1 回の検証内では同じスナップショットを使い続けること。
    pub fn snapshot(&self) -> Arc<RevocationSnapshot> {
        self.snapshot.load_full()
    }

    pub fn replace(&self, snapshot: RevocationSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }
}

impl Default for RevocationTracker {
    fn default() -> Self {
        Self::new()
    }
}
