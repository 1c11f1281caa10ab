//! castle-frame エラー型
//!
//! ここに並ぶものはすべてプロトコル違反（ProtocolViolation）。
//! 影響範囲は該当 message id の 1 メッセージのみで、他の組み立て中メッセージは壊さない。

use thiserror::Error;

/// chunk frame の解析・再組み立てエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// 40 バイトのヘッダーに満たない
    #[error("Chunk frame too short ({len} bytes, header needs 40)")]
    TooShort { len: usize },

    /// ヘッダーの数値フィールドが整数・非負・2^53 以下でない（timestamp は有限・非負）
    #[error("Invalid header field: {field}")]
    InvalidField { field: &'static str },

    /// total_chunks が total_bytes と矛盾する（0 個、空メッセージで 1 以外など）
    #[error("Invalid chunk count {total_chunks} for {total_bytes} bytes")]
    InvalidChunkCount { total_bytes: usize, total_chunks: usize },

    /// 空でないメッセージに対するペイロード 0 バイトの chunk
    #[error("Empty chunk payload for a non-empty message")]
    EmptyChunk,

    /// 宣言サイズが上限を超える
    #[error("Message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// 組み立て中メッセージ数が上限に達している
    #[error("Too many pending messages (max {max})")]
    TooManyPending { max: usize },

    /// chunk_index + payload 長が total_bytes を超える
    #[error("Chunk out of bounds (offset {offset}, len {len}, total {total})")]
    OutOfBounds { offset: usize, len: usize, total: usize },

    /// 同じ id で最初の chunk とヘッダーが食い違う
    #[error("Chunk header does not match the message in progress")]
    HeaderMismatch,

    /// 受信済み範囲と重なる chunk（完全な重複を含む）
    #[error("Chunk at offset {offset} overlaps received data")]
    OverlappingChunk { offset: usize },

    /// 全バイトが埋まった時点の chunk 数が宣言と合わない（またはその逆）
    #[error("Chunk count mismatch (received {received}, declared {expected})")]
    ChunkCountMismatch { received: usize, expected: usize },
}
