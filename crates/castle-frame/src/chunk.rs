//! Chunk frame の解析と分割
//!
//! ## Chunk Wire Format
//! ```text
//! offset 0  : id           (f64 LE, 8 bytes)
//! offset 8  : timestamp    (f64 LE, 8 bytes)
//! offset 16 : total_bytes  (f64 LE, 8 bytes)
//! offset 24 : total_chunks (f64 LE, 8 bytes)
//! offset 32 : chunk_index  (f64 LE, 8 bytes) ← 再組み立てバッファ内のバイトオフセット
//! offset 40+: payload
//! ```
//!
//! 既存ピアとの互換のため数値はすべて IEEE-754 double のまま送る。
//! 復号後の平文がこの形式であり、暗号化は 1 frame ずつ暗号コアが行う。

use alloc::vec::Vec;

use zeroize::Zeroizing;

use crate::error::FrameError;
use crate::timestamp::Timestamp;

/// 2^53（f64 で正確に表せる最大の整数）
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// メッセージ識別子
///
/// ワイヤ上の `f64` のビットパターンをそのまま保持する。
/// 同一性の比較にしか使わないので、送信側がどんな値を選んでも正確に往復する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    /// ワイヤ上の `f64` 値から生成する
    pub fn from_f64(value: f64) -> Self {
        MessageId(value.to_bits())
    }

    /// ワイヤに書く `f64` 値
    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.0)
    }
}

/// 40 バイトの chunk ヘッダー
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkHeader {
    /// 論理メッセージの ID（同じメッセージの chunk は全部同じ値）
    pub id: MessageId,
    /// 送信時刻
    pub timestamp: Timestamp,
    /// 再組み立て後の総バイト数
    pub total_bytes: usize,
    /// メッセージを構成する chunk 数
    pub total_chunks: usize,
    /// この chunk のペイロードを書き込むバイトオフセット（連番ではない）
    pub chunk_index: usize,
}

impl ChunkHeader {
    /// ヘッダー長
    pub const LEN: usize = 40;

    /// バイト列の先頭 40 バイトからヘッダーを復元する
    ///
    /// # エラー
    /// - `FrameError::TooShort`: 40 バイト未満
    /// - `FrameError::InvalidField`: timestamp が有限・非負でない、
    ///   またはサイズ系フィールドが 2^53 以下の非負整数でない
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < Self::LEN {
            return Err(FrameError::TooShort { len: bytes.len() });
        }

        let id = MessageId::from_f64(read_f64(bytes, 0));
        let timestamp = Timestamp::from_millis(read_f64(bytes, 8))
            .ok_or(FrameError::InvalidField { field: "timestamp" })?;
        let total_bytes = read_count(bytes, 16, "total_bytes")?;
        let total_chunks = read_count(bytes, 24, "total_chunks")?;
        let chunk_index = read_count(bytes, 32, "chunk_index")?;

        Ok(ChunkHeader {
            id,
            timestamp,
            total_bytes,
            total_chunks,
            chunk_index,
        })
    }

    /// ヘッダーを 40 バイトに書き出す
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..8].copy_from_slice(&self.id.as_f64().to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp.as_millis().to_le_bytes());
        out[16..24].copy_from_slice(&(self.total_bytes as f64).to_le_bytes());
        out[24..32].copy_from_slice(&(self.total_chunks as f64).to_le_bytes());
        out[32..40].copy_from_slice(&(self.chunk_index as f64).to_le_bytes());
        out
    }

    /// メッセージ全体として成り立つ chunk 数か
    ///
    /// - chunk 数 0 は不可
    /// - 空メッセージはちょうど 1 chunk
    /// - 空でないメッセージは各 chunk が 1 バイト以上なので chunk 数 <= バイト数
    pub fn check_counts(&self) -> Result<(), FrameError> {
        let invalid = self.total_chunks == 0
            || (self.total_bytes == 0 && self.total_chunks != 1)
            || self.total_chunks > self.total_bytes.max(1);

        if invalid {
            return Err(FrameError::InvalidChunkCount {
                total_bytes: self.total_bytes,
                total_chunks: self.total_chunks,
            });
        }
        Ok(())
    }
}

/// 復号済み chunk frame（ヘッダー + ペイロードへの参照）
#[derive(Debug, Clone, Copy)]
pub struct ChunkFrame<'a> {
    pub header: ChunkHeader,
    pub payload: &'a [u8],
}

impl<'a> ChunkFrame<'a> {
    /// 復号後の平文を chunk frame として解釈する
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        let header = ChunkHeader::decode(bytes)?;
        Ok(ChunkFrame {
            header,
            payload: &bytes[ChunkHeader::LEN..],
        })
    }

    /// Wire Format に変換する（Drop 時にゼロクリアされるバッファ）
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(ChunkHeader::LEN + self.payload.len()));
        bytes.extend_from_slice(&self.header.encode());
        bytes.extend_from_slice(self.payload);
        bytes
    }
}

/// 送信メッセージを chunk frame 列に分割する
///
/// 1 メッセージの全 frame は同じ id・timestamp・total_bytes・total_chunks を共有し、
/// chunk_index には各ペイロードのバイトオフセットが入る。
/// 返した frame は暗号コアが 1 つずつ暗号化して `send` に渡す。
pub struct Chunker {
    /// 次に使う message id
    next_id: u64,
    /// 1 chunk のペイロード最大バイト数
    chunk_length: usize,
}

impl Chunker {
    /// 新しい Chunker を生成する
    ///
    /// # 引数
    /// - `chunk_length`: 1 chunk のペイロード最大バイト数（0 は 1 として扱う）
    pub fn new(chunk_length: usize) -> Self {
        Chunker {
            next_id: 1, // 1 始まり
            chunk_length: chunk_length.max(1),
        }
    }

    /// メッセージを chunk frame 列に分割する
    ///
    /// 空メッセージでも空ペイロードの frame を 1 つ返す。
    pub fn make_frames(&mut self, timestamp: Timestamp, message: &[u8]) -> Vec<Zeroizing<Vec<u8>>> {
        let id = MessageId::from_f64(self.next_id as f64);
        self.next_id = self.next_id.wrapping_add(1);

        let total_bytes = message.len();
        let total_chunks = total_bytes.div_ceil(self.chunk_length).max(1);

        let frame_at = |chunk_index: usize, payload: &[u8]| {
            ChunkFrame {
                header: ChunkHeader {
                    id,
                    timestamp,
                    total_bytes,
                    total_chunks,
                    chunk_index,
                },
                payload,
            }
            .to_bytes()
        };

        if message.is_empty() {
            return alloc::vec![frame_at(0, &[])];
        }

        message
            .chunks(self.chunk_length)
            .enumerate()
            .map(|(i, payload)| frame_at(i * self.chunk_length, payload))
            .collect()
    }

    /// 1 chunk のペイロード最大バイト数
    pub fn chunk_length(&self) -> usize {
        self.chunk_length
    }
}

fn read_f64(bytes: &[u8], offset: usize) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_le_bytes(buf)
}

/// サイズ系フィールド: 0 以上 2^53 以下の整数のみ受け付ける
fn read_count(bytes: &[u8], offset: usize, field: &'static str) -> Result<usize, FrameError> {
    let value = read_f64(bytes, offset);
    if !(value >= 0.0 && value <= MAX_SAFE_INTEGER) || (value as u64) as f64 != value {
        return Err(FrameError::InvalidField { field });
    }
    usize::try_from(value as u64).map_err(|_| FrameError::InvalidField { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(id: f64, total_bytes: usize, total_chunks: usize, chunk_index: usize) -> ChunkHeader {
        ChunkHeader {
            id: MessageId::from_f64(id),
            timestamp: Timestamp::from_millis(100.0).unwrap(),
            total_bytes,
            total_chunks,
            chunk_index,
        }
    }

    #[test]
    fn test_header_layout_is_little_endian_f64() {
        let bytes = header(1.0, 5, 1, 0).encode();

        assert_eq!(&bytes[0..8], &1.0f64.to_le_bytes());
        assert_eq!(&bytes[8..16], &100.0f64.to_le_bytes());
        assert_eq!(&bytes[16..24], &5.0f64.to_le_bytes());
        assert_eq!(&bytes[24..32], &1.0f64.to_le_bytes());
        assert_eq!(&bytes[32..40], &0.0f64.to_le_bytes());
    }

    #[test]
    fn test_parse_single_chunk() {
        let h = header(1.0, 5, 1, 0);
        let frame = ChunkFrame { header: h, payload: b"hello" }.to_bytes();

        let parsed = ChunkFrame::parse(&frame).unwrap();
        assert_eq!(parsed.header, h);
        assert_eq!(parsed.payload, b"hello");
    }

    #[test]
    fn test_parse_too_short() {
        let result = ChunkFrame::parse(&[0u8; 39]);
        assert_eq!(result.unwrap_err(), FrameError::TooShort { len: 39 });
    }

    #[test]
    fn test_fractional_id_is_preserved() {
        // id はビットパターンで比較するので小数でも往復する
        let h = header(0.123_456_789, 1, 1, 0);
        let parsed = ChunkHeader::decode(&h.encode()).unwrap();
        assert_eq!(parsed.id, MessageId::from_f64(0.123_456_789));
    }

    #[test]
    fn test_non_integral_size_rejected() {
        let mut bytes = header(1.0, 5, 1, 0).encode();
        bytes[16..24].copy_from_slice(&2.5f64.to_le_bytes());

        assert_eq!(
            ChunkHeader::decode(&bytes).unwrap_err(),
            FrameError::InvalidField { field: "total_bytes" }
        );
    }

    #[test]
    fn test_negative_and_nan_fields_rejected() {
        let mut bytes = header(1.0, 5, 1, 0).encode();
        bytes[32..40].copy_from_slice(&(-5.0f64).to_le_bytes());
        assert_eq!(
            ChunkHeader::decode(&bytes).unwrap_err(),
            FrameError::InvalidField { field: "chunk_index" }
        );

        let mut bytes = header(1.0, 5, 1, 0).encode();
        bytes[24..32].copy_from_slice(&f64::NAN.to_le_bytes());
        assert_eq!(
            ChunkHeader::decode(&bytes).unwrap_err(),
            FrameError::InvalidField { field: "total_chunks" }
        );

        let mut bytes = header(1.0, 5, 1, 0).encode();
        bytes[8..16].copy_from_slice(&f64::NEG_INFINITY.to_le_bytes());
        assert_eq!(
            ChunkHeader::decode(&bytes).unwrap_err(),
            FrameError::InvalidField { field: "timestamp" }
        );
    }

    #[test]
    fn test_check_counts() {
        assert!(header(1.0, 5, 1, 0).check_counts().is_ok());
        assert!(header(1.0, 0, 1, 0).check_counts().is_ok());
        assert!(header(1.0, 5, 5, 0).check_counts().is_ok());

        assert!(header(1.0, 5, 0, 0).check_counts().is_err());
        assert!(header(1.0, 0, 2, 0).check_counts().is_err());
        assert!(header(1.0, 5, 6, 0).check_counts().is_err());
    }

    #[test]
    fn test_chunker_single_frame() {
        let mut chunker = Chunker::new(100);
        let ts = Timestamp::from_millis(42.0).unwrap();
        let frames = chunker.make_frames(ts, b"hello");

        assert_eq!(frames.len(), 1);
        let frame = ChunkFrame::parse(&frames[0]).unwrap();
        assert_eq!(frame.header.id, MessageId::from_f64(1.0));
        assert_eq!(frame.header.total_bytes, 5);
        assert_eq!(frame.header.total_chunks, 1);
        assert_eq!(frame.header.chunk_index, 0);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn test_chunker_offsets_are_byte_offsets() {
        let mut chunker = Chunker::new(4); // 小さい chunk 長でテスト
        let ts = Timestamp::from_millis(1.0).unwrap();
        let data: Vec<u8> = (0u8..10).collect(); // 4 + 4 + 2
        let frames = chunker.make_frames(ts, &data);

        assert_eq!(frames.len(), 3);
        let offsets: Vec<usize> = frames
            .iter()
            .map(|f| ChunkFrame::parse(f).unwrap().header.chunk_index)
            .collect();
        assert_eq!(offsets, alloc::vec![0, 4, 8]);

        let last = ChunkFrame::parse(&frames[2]).unwrap();
        assert_eq!(last.header.total_chunks, 3);
        assert_eq!(last.header.total_bytes, 10);
        assert_eq!(last.payload, &[8u8, 9]);
    }

    #[test]
    fn test_chunker_empty_message() {
        let mut chunker = Chunker::new(4);
        let frames = chunker.make_frames(Timestamp::EPOCH, b"");

        assert_eq!(frames.len(), 1);
        let frame = ChunkFrame::parse(&frames[0]).unwrap();
        assert_eq!(frame.header.total_bytes, 0);
        assert_eq!(frame.header.total_chunks, 1);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_chunker_ids_increment() {
        let mut chunker = Chunker::new(4);
        let a = chunker.make_frames(Timestamp::EPOCH, b"a");
        let b = chunker.make_frames(Timestamp::EPOCH, b"b");

        let id_a = ChunkFrame::parse(&a[0]).unwrap().header.id;
        let id_b = ChunkFrame::parse(&b[0]).unwrap().header.id;
        assert_ne!(id_a, id_b);
        assert_eq!(id_b, MessageId::from_f64(2.0));
    }
}
