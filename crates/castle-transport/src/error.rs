//! castle-transport エラー型

use castle_frame::FrameError;
use thiserror::Error;

/// トランスポート層のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// chunk frame のプロトコル違反（影響はその message id のみ）
    #[error("Protocol violation: {0}")]
    Protocol(#[from] FrameError),

    /// interception の待ち時間切れ
    #[error("Cyphertext interception timeout.")]
    InterceptionTimeout,

    /// interception の登録が blob を受け取らずに消えた
    #[error("Cyphertext interception cancelled")]
    InterceptionCancelled,

    /// 送信 cyphertext の Base64 デコードに失敗
    #[error("Invalid Base64 cyphertext")]
    InvalidBase64,
}
