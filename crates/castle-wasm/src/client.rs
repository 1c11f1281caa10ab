//! CastleTransport wasm-bindgen エクスポート
//!
//! ブラウザのセッション層から呼び出すトランスポートの主エントリポイント。
//! 暗号コアは JS 側にあり、ここでは chunk 分割・再組み立て・鮮度判定・監査・送信 blob 化を行う。

use std::rc::Rc;

use js_sys::{Array, Promise, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use zeroize::{Zeroize, Zeroizing};

use castle_frame::Timestamp;
use castle_transport::{
    Cyphertext, EventReceiver, IncomingOutcome, SessionEvent, Transport, TransportConfig,
    TransportError,
};

#[wasm_bindgen]
extern "C" {
    /// ブラウザ・Node.js 共通のグローバル `setTimeout`
    #[wasm_bindgen(js_name = setTimeout)]
    fn set_timeout(handler: &JsValue, timeout_ms: f64) -> JsValue;
}

/// Castle トランスポートセッション
///
/// ## 内部アーキテクチャ
///
/// ```text
/// CastleTransport
///   ├── Transport (castle-transport)
///   │     ├── ChunkReassembler / FreshnessGate / Chunker (castle-frame)
///   │     ├── InterceptionQueue
///   │     ├── CyphertextAuditor / OutgoingFramer
///   │     └── SessionBridge ─→ mpsc
///   └── events: mpsc の受信側（drainEvents で JS へ）
/// ```
///
/// ## スレッド安全性
///
/// WASM はシングルスレッド。JS からは単一スレッドで呼び出される前提。
#[wasm_bindgen]
pub struct CastleTransport {
    /// interception のタイマーからも参照する
    transport: Rc<Transport>,
    events: EventReceiver,
}

#[wasm_bindgen]
impl CastleTransport {
    /// トランスポートを初期化する
    ///
    /// # 引数
    /// - `config_json`: 設定 JSON（省略時は既定値）。未指定の項目も既定値になる
    ///   例: `'{"chunkLength": 1000000, "interceptionTimeoutMs": 30000}'`
    ///
    /// # エラー
    /// - 設定 JSON の解析失敗
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<CastleTransport, JsError> {
        let config = match config_json {
            Some(json) => serde_json::from_str::<TransportConfig>(&json)
                .map_err(|e| JsError::new(&format!("Invalid transport config: {}", e)))?,
            None => TransportConfig::default(),
        };

        let (transport, events) = Transport::channel(config);
        Ok(CastleTransport {
            transport: Rc::new(transport),
            events,
        })
    }

    /// connect イベントを発行する
    #[wasm_bindgen]
    pub fn connect(&self) {
        self.transport.connect();
    }

    /// abort イベントを発行する
    #[wasm_bindgen]
    pub fn abort(&self) {
        self.transport.abort();
    }

    /// Base64 テキストの cyphertext を送信する
    ///
    /// # 引数
    /// - `cyphertext_base64`: 暗号コアが出力した Base64 cyphertext
    /// - `message_id`: 前置する message id（省略可）
    ///
    /// # エラー
    /// - `message_id` 付きで `cyphertext_base64` が Base64 として不正
    #[wasm_bindgen]
    pub fn send(
        &self,
        cyphertext_base64: String,
        message_id: Option<Vec<u8>>,
    ) -> Result<(), JsError> {
        self.transport
            .send(Cyphertext::Text(cyphertext_base64), message_id.as_deref())
            .map_err(to_js_error)
    }

    /// 生バイトの cyphertext を送信する
    ///
    /// `message_id` がないとき、渡された `cyphertext`（JS 側の Uint8Array）は
    /// 送信後にゼロクリアされる。`message_id` 付きのときはそのまま残る。
    #[wasm_bindgen(js_name = "sendBytes")]
    pub fn send_bytes(
        &self,
        cyphertext: &mut [u8],
        message_id: Option<Vec<u8>>,
    ) -> Result<(), JsError> {
        let cyphertext = match message_id {
            None => take_buffer(cyphertext),
            Some(_) => Zeroizing::new(cyphertext.to_vec()),
        };
        self.transport
            .send(Cyphertext::Bytes(cyphertext), message_id.as_deref())
            .map_err(to_js_error)
    }

    /// 平文メッセージを chunk frame の配列に分割する
    ///
    /// 各 frame を暗号コアで封緘し、`sendBytes` に渡す。
    ///
    /// # 引数
    /// - `plaintext`: UTF-8 エンコード済みのメッセージ
    /// - `timestamp`: 送信時刻（`Date.now()`）
    ///
    /// # エラー
    /// - `timestamp` が負または非有限
    #[wasm_bindgen(js_name = "makeFrames")]
    pub fn make_frames(&self, plaintext: &[u8], timestamp: f64) -> Result<Array, JsError> {
        let timestamp = Timestamp::from_millis(timestamp)
            .ok_or_else(|| JsError::new(&format!("Invalid timestamp: {}", timestamp)))?;

        let result = Array::new();
        for frame in self.transport.make_frames(timestamp, plaintext) {
            result.push(&Uint8Array::from(&frame[..]));
        }
        Ok(result)
    }

    /// 受信した生 cyphertext を interception 待ちに渡す
    ///
    /// # 戻り値
    /// `true` なら横取りされた。以後の処理（復号・receive）は行わない
    #[wasm_bindgen(js_name = "offerIncomingCyphertext")]
    pub fn offer_incoming_cyphertext(&self, cyphertext: &[u8], now_ms: f64) -> bool {
        self.transport
            .offer_incoming_cyphertext(cyphertext, now_ms as u64)
    }

    /// 復号済みの chunk frame を処理する
    ///
    /// # 引数
    /// - `cyphertext`: 監査用の元 cyphertext
    /// - `plaintext`: 暗号コアが復号した chunk frame。
    ///   JS 側の Uint8Array もここでゼロクリアされる（結果・エラーに関係なく）
    /// - `author`: 送信者
    /// - `now_ms`: 現在時刻（`Date.now()`）
    ///
    /// # 戻り値
    /// `"pending"` / `"delivered"` / `"stale"` / `"undecodable"`
    ///
    /// # エラー
    /// - chunk のプロトコル違反（その message id は破棄される）
    #[wasm_bindgen]
    pub fn receive(
        &self,
        cyphertext: &[u8],
        plaintext: &mut [u8],
        author: &str,
        now_ms: f64,
    ) -> Result<String, JsError> {
        let plaintext = take_buffer(plaintext);
        let outcome = self
            .transport
            .receive(cyphertext, plaintext, author, now_ms as u64)
            .map_err(to_js_error)?;
        Ok(outcome_name(&outcome).to_owned())
    }

    /// 次の生 cyphertext を横取りする
    ///
    /// 期限付きの登録ごとに JS の `setTimeout` を仕掛けるので、
    /// `tick` を呼ばなくても期限が来れば reject される。
    ///
    /// # 引数
    /// - `timeout_ms`: 期限（省略時は設定値、0 でタイムアウトなし）
    /// - `now_ms`: 現在時刻（`Date.now()`）
    ///
    /// # 戻り値
    /// 横取りした cyphertext で解決する Promise。
    /// 期限切れのときは `"Cyphertext interception timeout."` で reject される
    #[wasm_bindgen(js_name = "interceptIncomingCyphertext")]
    pub fn intercept_incoming_cyphertext(&self, timeout_ms: Option<f64>, now_ms: f64) -> Promise {
        let timeout_ms = timeout_ms
            .map(|ms| ms as u64)
            .unwrap_or(self.transport.config().interception_timeout_ms);
        let now_ms = now_ms as u64;
        let interception = self
            .transport
            .intercept_incoming_cyphertext_at(Some(timeout_ms), now_ms);

        if timeout_ms > 0 {
            let transport = Rc::clone(&self.transport);
            let deadline_ms = now_ms.saturating_add(timeout_ms);
            let on_timeout = Closure::once_into_js(move || {
                // JS タイマーは早まらないが、時計のずれで期限前と判定されないようにする
                let now_ms = (js_sys::Date::now() as u64).max(deadline_ms);
                transport.expire_interceptions(now_ms);
            });
            set_timeout(&on_timeout, timeout_ms as f64);
        }

        future_to_promise(async move {
            let cyphertext = interception
                .await
                .map_err(|e| JsValue::from(to_js_error(e)))?;
            Ok(Uint8Array::from(&cyphertext[..]).into())
        })
    }

    /// 定期処理（interception の期限切れ・アイドルな組み立て中メッセージの破棄）
    ///
    /// # 戻り値
    /// JSON 文字列: `{"expiredInterceptions":0,"evictedMessages":0}`
    #[wasm_bindgen]
    pub fn tick(&self, now_ms: f64) -> Result<String, JsError> {
        let report = self.transport.tick(now_ms as u64);
        serde_json::to_string(&report).map_err(|e| JsError::new(&format!("{}", e)))
    }

    /// 溜まっているセッションイベントをすべて取り出す
    ///
    /// # 戻り値
    /// JSON 配列文字列:
    /// ```json
    /// [
    ///   { "type": "cyphertext", "author": "me", "cyphertext": "AAAA" },
    ///   { "type": "castle", "event": "send", "data": "AAAA" },
    ///   { "type": "castle", "event": "receive", "author": "friend", "timestamp": 100, "plaintext": "hello" }
    /// ]
    /// ```
    #[wasm_bindgen(js_name = "drainEvents")]
    pub fn drain_events(&mut self) -> Result<String, JsError> {
        let events = drain(&mut self.events);
        serde_json::to_string(&events).map_err(|e| JsError::new(&format!("{}", e)))
    }

    /// セッション統計を JSON 文字列で返す
    ///
    /// ```json
    /// { "pendingMessages": 1, "pendingInterceptions": 0, "lastDelivered": 100 }
    /// ```
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> String {
        format!(
            r#"{{"pendingMessages":{},"pendingInterceptions":{},"lastDelivered":{}}}"#,
            self.transport.pending_messages(),
            self.transport.pending_interceptions(),
            self.transport.last_delivered().as_millis(),
        )
    }
}

/// JS 側のバッファを Rust 側に引き取り、元のバッファはゼロクリアする
fn take_buffer(buffer: &mut [u8]) -> Zeroizing<Vec<u8>> {
    let owned = Zeroizing::new(buffer.to_vec());
    buffer.zeroize();
    owned
}

fn to_js_error(e: TransportError) -> JsError {
    JsError::new(&format!("{}", e))
}

/// JS に返す受信結果の名前
pub fn outcome_name(outcome: &IncomingOutcome) -> &'static str {
    match outcome {
        IncomingOutcome::Intercepted => "intercepted",
        IncomingOutcome::Unopened => "unopened",
        IncomingOutcome::Pending => "pending",
        IncomingOutcome::Delivered { .. } => "delivered",
        IncomingOutcome::Stale { .. } => "stale",
        IncomingOutcome::Undecodable { .. } => "undecodable",
    }
}

fn drain(events: &mut EventReceiver) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_buffer_clears_caller_buffer() {
        let mut frame = b"decrypted frame".to_vec();
        let owned = take_buffer(&mut frame);

        assert_eq!(&owned[..], b"decrypted frame");
        assert!(frame.iter().all(|&b| b == 0), "呼び出し側のバッファはゼロクリアされるはず");
        assert_eq!(frame.len(), 15, "長さは変えない");
    }
}
