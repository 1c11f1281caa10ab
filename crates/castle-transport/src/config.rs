//! Transport の設定値

use core::time::Duration;

use castle_frame::reassembly::{
    DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MAX_PENDING,
};
use castle_frame::{ReassemblyLimits, DEFAULT_CHUNK_LENGTH};
use serde::{Deserialize, Serialize};

/// これ以上の長さ（Base64 文字数）の cyphertext はログに出さない
pub const CYPHERTEXT_LIMIT: usize = 200_000;

/// interception の既定タイムアウト（ミリ秒）
pub const DEFAULT_INTERCEPTION_TIMEOUT_MS: u64 = 45_000;

/// Transport の設定
///
/// JSON からも読めるよう serde に対応する（未指定の項目は既定値）。
///
/// ```json
/// { "cyphertextLimit": 200000, "chunkLength": 5000000, "interceptionTimeoutMs": 45000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportConfig {
    /// 監査ログに出す cyphertext の長さ上限（この値以上は出さない）
    pub cyphertext_limit: usize,
    /// 1 chunk のペイロード最大バイト数
    pub chunk_length: usize,
    /// interception の既定タイムアウト（0 でタイムアウトなし）
    pub interception_timeout_ms: u64,
    /// 組み立て中メッセージのアイドル破棄時間（0 で無効）
    pub reassembly_idle_timeout_ms: u64,
    /// 同時に組み立て中にできるメッセージ数
    pub max_pending_messages: usize,
    /// 1 メッセージの宣言サイズ上限
    pub max_message_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            cyphertext_limit: CYPHERTEXT_LIMIT,
            chunk_length: DEFAULT_CHUNK_LENGTH,
            interception_timeout_ms: DEFAULT_INTERCEPTION_TIMEOUT_MS,
            reassembly_idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_pending_messages: DEFAULT_MAX_PENDING,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl TransportConfig {
    /// 再組み立て層に渡す上限
    pub fn reassembly_limits(&self) -> ReassemblyLimits {
        ReassemblyLimits {
            max_pending: self.max_pending_messages,
            max_message_bytes: self.max_message_bytes,
            idle_timeout_ms: self.reassembly_idle_timeout_ms,
        }
    }

    /// interception の既定タイムアウト
    pub fn interception_timeout(&self) -> Duration {
        Duration::from_millis(self.interception_timeout_ms)
    }
}
