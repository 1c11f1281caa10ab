//! Cyphertext の監査イベント
//!
//! 送受信どちらの cyphertext も、処理の前に Base64 テキストとしてエコーする。
//! 巨大な blob で購読者をあふれさせないよう、上限以上の長さのものは出さない。

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::event::SessionEvent;

/// 上限付きの cyphertext 監査
#[derive(Debug, Clone, Copy)]
pub struct CyphertextAuditor {
    limit: usize,
}

impl CyphertextAuditor {
    /// # 引数
    /// - `limit`: この長さ（Base64 文字数）以上の cyphertext は出さない
    pub fn new(limit: usize) -> Self {
        CyphertextAuditor { limit }
    }

    /// Base64 テキストの cyphertext から監査イベントを作る
    ///
    /// # 戻り値
    /// - `Some(event)`: 上限未満
    /// - `None`: 上限以上（ログに出さない）
    pub fn audit(&self, cyphertext: &str, author: &str) -> Option<SessionEvent> {
        if cyphertext.len() >= self.limit {
            tracing::debug!(len = cyphertext.len(), limit = self.limit, "cyphertext too large to audit");
            return None;
        }

        Some(SessionEvent::Cyphertext {
            author: author.to_owned(),
            cyphertext: cyphertext.to_owned(),
        })
    }

    /// 生バイトの cyphertext から監査イベントを作る
    ///
    /// エンコード後の長さを先に計算し、上限以上なら Base64 化自体を省く。
    pub fn audit_bytes(&self, cyphertext: &[u8], author: &str) -> Option<SessionEvent> {
        let encoded_len = base64::encoded_len(cyphertext.len(), true).unwrap_or(usize::MAX);
        if encoded_len >= self.limit {
            tracing::debug!(len = encoded_len, limit = self.limit, "cyphertext too large to audit");
            return None;
        }

        Some(SessionEvent::Cyphertext {
            author: author.to_owned(),
            cyphertext: STANDARD.encode(cyphertext),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CYPHERTEXT_LIMIT;

    #[test]
    fn test_cutoff_boundary() {
        let auditor = CyphertextAuditor::new(CYPHERTEXT_LIMIT);

        let below = "A".repeat(CYPHERTEXT_LIMIT - 1);
        let at = "A".repeat(CYPHERTEXT_LIMIT);
        let above = "A".repeat(CYPHERTEXT_LIMIT + 1);

        assert!(auditor.audit(&below, "me").is_some());
        assert!(auditor.audit(&at, "me").is_none());
        assert!(auditor.audit(&above, "me").is_none());
    }

    #[test]
    fn test_audit_event_payload() {
        let auditor = CyphertextAuditor::new(100);
        let event = auditor.audit("QUJD", "friend").unwrap();
        assert_eq!(
            event,
            SessionEvent::Cyphertext {
                author: "friend".into(),
                cyphertext: "QUJD".into(),
            }
        );
    }

    #[test]
    fn test_audit_bytes_encodes_base64() {
        let auditor = CyphertextAuditor::new(100);
        let event = auditor.audit_bytes(b"ABC", "friend").unwrap();
        assert_eq!(
            event,
            SessionEvent::Cyphertext {
                author: "friend".into(),
                cyphertext: "QUJD".into(),
            }
        );
    }

    #[test]
    fn test_audit_bytes_uses_encoded_length() {
        // 3 バイト → Base64 4 文字
        let auditor = CyphertextAuditor::new(4);
        assert!(auditor.audit_bytes(b"ABC", "me").is_none());
        assert!(auditor.audit_bytes(b"AB", "me").is_none()); // "QUI=" も 4 文字

        let auditor = CyphertextAuditor::new(5);
        assert!(auditor.audit_bytes(b"ABC", "me").is_some());
    }
}
