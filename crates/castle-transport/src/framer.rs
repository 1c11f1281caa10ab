//! 送信 cyphertext のテキスト化
//!
//! チャンネルはテキストしか運べないので、cyphertext を Base64 にして渡す。
//! message id がある場合は `[message_id][cyphertext]` と連結してから Base64 化する。
//!
//! chunk 分割は暗号化の前（平文側、`castle_frame::Chunker`）で行うので、
//! ここに来る cyphertext は暗号化済みの 1 frame 分。

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::Zeroizing;

use crate::error::TransportError;

/// 送信する cyphertext
pub enum Cyphertext {
    /// Base64 テキスト（そのままチャンネルに流せる）
    Text(String),
    /// 生バイト。所有権はフレーマーに移り、Base64 化後にゼロクリアされる
    Bytes(Zeroizing<Vec<u8>>),
}

impl From<String> for Cyphertext {
    fn from(text: String) -> Self {
        Cyphertext::Text(text)
    }
}

impl From<&str> for Cyphertext {
    fn from(text: &str) -> Self {
        Cyphertext::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Cyphertext {
    fn from(bytes: Vec<u8>) -> Self {
        Cyphertext::Bytes(Zeroizing::new(bytes))
    }
}

/// 送信 blob を組み立てる
#[derive(Debug, Clone, Copy, Default)]
pub struct OutgoingFramer;

impl OutgoingFramer {
    /// cyphertext（と任意の message id）からチャンネルに流す Base64 blob を作る
    ///
    /// # エラー
    /// - `TransportError::InvalidBase64`: id 付き連結のために Text を復元できなかった
    pub fn frame(
        &self,
        cyphertext: Cyphertext,
        message_id: Option<&[u8]>,
    ) -> Result<String, TransportError> {
        let Some(message_id) = message_id else {
            return Ok(match cyphertext {
                Cyphertext::Text(text) => text,
                Cyphertext::Bytes(bytes) => STANDARD.encode(&bytes[..]),
            });
        };

        let body = match cyphertext {
            Cyphertext::Text(text) => Zeroizing::new(
                STANDARD
                    .decode(text.as_bytes())
                    .map_err(|_| TransportError::InvalidBase64)?,
            ),
            Cyphertext::Bytes(bytes) => bytes,
        };

        let mut framed = Zeroizing::new(Vec::with_capacity(message_id.len() + body.len()));
        framed.extend_from_slice(message_id);
        framed.extend_from_slice(&body);
        Ok(STANDARD.encode(&framed[..]))
    }

    /// チャンネルから届いた Base64 blob を生バイトに戻す
    pub fn decode(&self, blob: &str) -> Result<Vec<u8>, TransportError> {
        STANDARD
            .decode(blob.as_bytes())
            .map_err(|_| TransportError::InvalidBase64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_without_id_passes_through() {
        let blob = OutgoingFramer.frame("QUJD".into(), None).unwrap();
        assert_eq!(blob, "QUJD");
    }

    #[test]
    fn test_bytes_without_id_are_encoded() {
        let blob = OutgoingFramer.frame(b"ABC".to_vec().into(), None).unwrap();
        assert_eq!(blob, "QUJD");
    }

    #[test]
    fn test_id_prefix_with_text() {
        // "QUJD" = "ABC"
        let blob = OutgoingFramer.frame("QUJD".into(), Some(b"id")).unwrap();
        assert_eq!(OutgoingFramer.decode(&blob).unwrap(), b"idABC");
    }

    #[test]
    fn test_id_prefix_with_bytes() {
        let blob = OutgoingFramer
            .frame(b"ABC".to_vec().into(), Some(&[1, 2]))
            .unwrap();
        assert_eq!(OutgoingFramer.decode(&blob).unwrap(), vec![1, 2, b'A', b'B', b'C']);
    }

    #[test]
    fn test_id_prefix_with_invalid_text() {
        let result = OutgoingFramer.frame("not base64!".into(), Some(b"id"));
        assert_eq!(result.unwrap_err(), TransportError::InvalidBase64);
    }
}
