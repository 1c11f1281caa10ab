//! セッションイベントとイベントバスへの橋渡し
//!
//! Transport の外向きの作用はすべてセッションのイベントバスに載せるイベントとして表す。
//! 描画・ハンドシェイク側はバスを購読するだけで、Transport を直接呼び返さない。
//!
//! ```text
//! castle     : { event: "connect" | "abort" }
//!              { event: "send",    data: <Base64 blob> }
//!              { event: "receive", author, timestamp, plaintext }
//! cyphertext : { author, cyphertext }
//! ```

use castle_frame::Timestamp;
use serde::Serialize;
use tokio::sync::mpsc;

/// ローカルユーザーを表す author 名
pub const LOCAL_USER: &str = "me";

/// Castle プロトコルのライフサイクル・送受信イベント
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum CastleEvent {
    Abort,
    Connect,
    /// 復号・再組み立て・鮮度判定を通過した受信メッセージ
    Receive {
        author: String,
        timestamp: f64,
        plaintext: String,
    },
    /// チャンネルに流すテキスト blob
    Send { data: String },
}

/// セッションのイベントバスに載るイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Castle(CastleEvent),
    /// 監査用の cyphertext エコー
    Cyphertext { author: String, cyphertext: String },
}

/// セッションのイベントバス
///
/// 配送保証はバス側に任せる（Transport は再送もバッファもしない）。
pub trait SessionBus {
    fn trigger(&self, event: SessionEvent);
}

impl SessionBus for mpsc::UnboundedSender<SessionEvent> {
    fn trigger(&self, event: SessionEvent) {
        if self.send(event).is_err() {
            tracing::debug!("session bus closed, event dropped");
        }
    }
}

/// ライフサイクル呼び出しをイベントに変換してバスに流す
///
/// 外部チャンネルとの唯一の接点。
pub struct SessionBridge<B> {
    bus: B,
}

impl<B: SessionBus> SessionBridge<B> {
    pub fn new(bus: B) -> Self {
        SessionBridge { bus }
    }

    pub fn connect(&self) {
        self.bus.trigger(SessionEvent::Castle(CastleEvent::Connect));
    }

    pub fn abort(&self) {
        self.bus.trigger(SessionEvent::Castle(CastleEvent::Abort));
    }

    /// 受信メッセージをアプリケーションへ渡す
    pub fn deliver(&self, author: &str, timestamp: Timestamp, plaintext: String) {
        self.bus.trigger(SessionEvent::Castle(CastleEvent::Receive {
            author: author.to_owned(),
            timestamp: timestamp.as_millis(),
            plaintext,
        }));
    }

    /// 送信 blob をチャンネルへ渡す
    pub fn send(&self, data: String) {
        self.bus.trigger(SessionEvent::Castle(CastleEvent::Send { data }));
    }

    /// 任意のイベント（監査イベントなど）をそのまま流す
    pub fn emit(&self, event: SessionEvent) {
        self.bus.trigger(event);
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_emits_in_call_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bridge = SessionBridge::new(tx);

        bridge.connect();
        bridge.send("AAAA".into());
        bridge.abort();

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Castle(CastleEvent::Connect));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Castle(CastleEvent::Send { data: "AAAA".into() })
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Castle(CastleEvent::Abort));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_bus_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let bridge = SessionBridge::new(tx);
        bridge.connect();
    }

    #[test]
    fn test_event_json_shape() {
        let receive = SessionEvent::Castle(CastleEvent::Receive {
            author: "friend".into(),
            timestamp: 100.0,
            plaintext: "hello".into(),
        });
        let json = serde_json::to_value(&receive).unwrap();
        assert_eq!(json["type"], "castle");
        assert_eq!(json["event"], "receive");
        assert_eq!(json["author"], "friend");
        assert_eq!(json["plaintext"], "hello");

        let abort = serde_json::to_value(SessionEvent::Castle(CastleEvent::Abort)).unwrap();
        assert_eq!(abort["event"], "abort");

        let audit = serde_json::to_value(SessionEvent::Cyphertext {
            author: LOCAL_USER.into(),
            cyphertext: "AAAA".into(),
        })
        .unwrap();
        assert_eq!(audit["type"], "cyphertext");
        assert_eq!(audit["author"], "me");
    }
}
