//! Chunk の再組み立て
//!
//! message id ごとに、最初に届いた chunk のヘッダーで宣言された
//! `total_bytes` のゼロ初期化バッファを用意し、各 chunk を `chunk_index`
//! （バイトオフセット）の位置に書き込む。受信済み範囲を記録し、
//! 重複・重なりはプロトコル違反として弾く。
//!
//! 組み立て中の状態は Transport インスタンスが所有し、プロセス全体では共有しない。
//! 完了・違反・放棄・期限切れのどの経路でもバッファは Drop 時にゼロクリアされる。

use alloc::collections::btree_map::Entry;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use zeroize::Zeroizing;

use crate::chunk::{ChunkFrame, ChunkHeader, MessageId};
use crate::error::FrameError;
use crate::timestamp::Timestamp;

/// 組み立て中メッセージ数の既定上限
pub const DEFAULT_MAX_PENDING: usize = 128;

/// 1 メッセージの宣言サイズの既定上限（バイト）
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 50_000_000;

/// 最後の chunk から破棄までの既定アイドル時間（ミリ秒）
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 300_000;

/// 再組み立ての資源上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyLimits {
    /// 同時に組み立て中にできる message id の数
    pub max_pending: usize,
    /// 1 メッセージの total_bytes の上限
    pub max_message_bytes: usize,
    /// 最後の chunk 受信からこの時間を超えたメッセージは `evict_idle` で破棄（0 で無効）
    pub idle_timeout_ms: u64,
}

impl Default for ReassemblyLimits {
    fn default() -> Self {
        ReassemblyLimits {
            max_pending: DEFAULT_MAX_PENDING,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

/// すべての chunk が揃ったメッセージ
///
/// バッファの所有権は呼び出し側に移る。Drop でゼロクリアされる。
#[derive(Debug)]
pub struct CompletedMessage {
    pub id: MessageId,
    pub timestamp: Timestamp,
    pub data: Zeroizing<Vec<u8>>,
}

/// 組み立て中のメッセージ
struct PendingMessage {
    timestamp: Timestamp,
    total_bytes: usize,
    total_chunks: usize,
    buffer: Zeroizing<Vec<u8>>,
    /// 受信済み範囲（オフセット → 長さ）
    covered: BTreeMap<usize, usize>,
    covered_bytes: usize,
    last_activity_ms: u64,
}

impl PendingMessage {
    fn new(header: &ChunkHeader, now_ms: u64) -> Self {
        PendingMessage {
            timestamp: header.timestamp,
            total_bytes: header.total_bytes,
            total_chunks: header.total_chunks,
            buffer: Zeroizing::new(vec![0u8; header.total_bytes]),
            covered: BTreeMap::new(),
            covered_bytes: 0,
            last_activity_ms: now_ms,
        }
    }

    fn matches(&self, header: &ChunkHeader) -> bool {
        self.timestamp == header.timestamp
            && self.total_bytes == header.total_bytes
            && self.total_chunks == header.total_chunks
    }

    /// [offset, offset + len) が受信済み範囲と重なるか（同一オフセットも重なり扱い）
    fn overlaps(&self, offset: usize, len: usize) -> bool {
        if let Some((&start, &prev_len)) = self.covered.range(..=offset).next_back() {
            if start == offset || start + prev_len > offset {
                return true;
            }
        }
        if let Some((&start, _)) = self.covered.range(offset + 1..).next() {
            if start < offset + len {
                return true;
            }
        }
        false
    }

    fn write(&mut self, offset: usize, payload: &[u8], now_ms: u64) {
        self.buffer[offset..offset + payload.len()].copy_from_slice(payload);
        self.covered.insert(offset, payload.len());
        self.covered_bytes += payload.len();
        self.last_activity_ms = now_ms;
    }

    /// 完了判定
    ///
    /// バイトの充足と chunk 数の一致は同時に成り立たなければならない。
    /// 片方だけ成り立った時点で、以後どの chunk が来ても完了できないので違反とする。
    fn is_complete(&self) -> Result<bool, FrameError> {
        let received = self.covered.len();
        let all_bytes = self.covered_bytes == self.total_bytes;
        let all_chunks = received == self.total_chunks;

        match (all_bytes, all_chunks) {
            (true, true) => Ok(true),
            (false, false) => Ok(false),
            _ => Err(FrameError::ChunkCountMismatch {
                received,
                expected: self.total_chunks,
            }),
        }
    }

    fn is_idle(&self, now_ms: u64, idle_timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_activity_ms) > idle_timeout_ms
    }
}

/// message id をキーに chunk を再組み立てする
///
/// 異なる id のメッセージは独立に進行する。
/// 完了順は `total_chunks` に達した順で、id 間の順序は保証しない（鮮度ゲートの役割）。
pub struct ChunkReassembler {
    pending: BTreeMap<MessageId, PendingMessage>,
    limits: ReassemblyLimits,
}

impl ChunkReassembler {
    /// 既定の上限で生成する
    pub fn new() -> Self {
        Self::with_limits(ReassemblyLimits::default())
    }

    /// 上限を指定して生成する
    pub fn with_limits(limits: ReassemblyLimits) -> Self {
        ChunkReassembler {
            pending: BTreeMap::new(),
            limits,
        }
    }

    /// Chunk を追加する
    ///
    /// # 引数
    /// - `frame`: 復号済み chunk frame
    /// - `now_ms`: 受信時刻（アイドル破棄の判定用）
    ///
    /// # 戻り値
    /// - `Ok(Some(message))`: 宣言された全 chunk が揃った（状態はテーブルから除去済み）
    /// - `Ok(None)`: まだ chunk が足りない
    ///
    /// # エラー
    /// プロトコル違反。その id の組み立て中状態は破棄されるが、他の id には影響しない。
    pub fn ingest(
        &mut self,
        frame: &ChunkFrame<'_>,
        now_ms: u64,
    ) -> Result<Option<CompletedMessage>, FrameError> {
        let id = frame.header.id;
        self.try_ingest(frame, now_ms).inspect_err(|_| {
            self.pending.remove(&id);
        })
    }

    fn try_ingest(
        &mut self,
        frame: &ChunkFrame<'_>,
        now_ms: u64,
    ) -> Result<Option<CompletedMessage>, FrameError> {
        let header = &frame.header;
        self.validate(header, frame.payload.len())?;

        let at_capacity = self.pending.len() >= self.limits.max_pending;
        let pending = match self.pending.entry(header.id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if at_capacity {
                    return Err(FrameError::TooManyPending {
                        max: self.limits.max_pending,
                    });
                }
                entry.insert(PendingMessage::new(header, now_ms))
            }
        };

        if !pending.matches(header) {
            return Err(FrameError::HeaderMismatch);
        }
        if pending.overlaps(header.chunk_index, frame.payload.len()) {
            return Err(FrameError::OverlappingChunk {
                offset: header.chunk_index,
            });
        }

        pending.write(header.chunk_index, frame.payload, now_ms);

        if !pending.is_complete()? {
            return Ok(None);
        }

        Ok(self.pending.remove(&header.id).map(|done| CompletedMessage {
            id: header.id,
            timestamp: done.timestamp,
            data: done.buffer,
        }))
    }

    /// frame 単体で判定できる違反
    fn validate(&self, header: &ChunkHeader, len: usize) -> Result<(), FrameError> {
        header.check_counts()?;

        if header.total_bytes > self.limits.max_message_bytes {
            return Err(FrameError::MessageTooLarge {
                size: header.total_bytes,
                max: self.limits.max_message_bytes,
            });
        }

        if len == 0 && header.total_bytes > 0 {
            return Err(FrameError::EmptyChunk);
        }

        let out_of_bounds = header
            .chunk_index
            .checked_add(len)
            .map_or(true, |end| end > header.total_bytes);
        if out_of_bounds {
            return Err(FrameError::OutOfBounds {
                offset: header.chunk_index,
                len,
                total: header.total_bytes,
            });
        }

        Ok(())
    }

    /// アイドル時間を超えた組み立て中メッセージを破棄する
    ///
    /// # 戻り値
    /// 破棄した件数
    pub fn evict_idle(&mut self, now_ms: u64) -> usize {
        let idle_timeout_ms = self.limits.idle_timeout_ms;
        if idle_timeout_ms == 0 {
            return 0;
        }

        let before = self.pending.len();
        self.pending
            .retain(|_, pending| !pending.is_idle(now_ms, idle_timeout_ms));
        before - self.pending.len()
    }

    /// 指定 id の組み立てを放棄する
    pub fn abandon(&mut self, id: MessageId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// 組み立て中のメッセージ数
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// 指定 id が組み立て中か
    pub fn is_pending(&self, id: MessageId) -> bool {
        self.pending.contains_key(&id)
    }

    /// 現在の上限
    pub fn limits(&self) -> ReassemblyLimits {
        self.limits
    }
}

impl Default for ChunkReassembler {
    fn default() -> Self {
        Self::new()
    }
}
