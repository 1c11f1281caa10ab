//! # castle-frame
//!
//! Castle トランスポートの chunk frame 層。
//!
//! 暗号コアが扱うメッセージは下位チャンネルの安全なサイズを超えることがあるため、
//! 送信側で chunk に分割し、受信側で message id ごとに再組み立てする。
//! 完了したメッセージは鮮度ゲートを通ったものだけがアプリケーションに配信される。
//!
//! ## Chunk の Wire Format（復号後の平文）
//!
//! ```text
//! [id: f64 LE][timestamp: f64 LE][total_bytes: f64 LE][total_chunks: f64 LE][chunk_index: f64 LE][payload...]
//!
//! chunk_index: 再組み立てバッファ内のバイトオフセット（連番ではない）
//! ```
//!
//! ## 全体の流れ
//!
//! ```text
//! 送信: message → Chunker → [frame...] → 暗号コアが 1 frame ずつ暗号化 → send
//! 受信: 復号済み frame → ChunkFrame::parse → ChunkReassembler → FreshnessGate → 配信
//! ```

#![no_std]
extern crate alloc;

pub mod chunk;
pub mod error;
pub mod reassembly;
pub mod timestamp;

pub use chunk::{ChunkFrame, ChunkHeader, Chunker, MessageId};
pub use error::FrameError;
pub use reassembly::{ChunkReassembler, CompletedMessage, ReassemblyLimits};
pub use timestamp::{FreshnessGate, Timestamp};

/// 下位チャンネルに流す 1 chunk のペイロード既定上限（バイト）
pub const DEFAULT_CHUNK_LENGTH: usize = 5_000_000;
