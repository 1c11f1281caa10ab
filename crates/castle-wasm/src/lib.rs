//! # castle-wasm
//!
//! wasm-bindgen エクスポート：ブラウザのセッション層（JS）から呼び出す公開 API。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { CastleTransport, init_panic_hook } from '../castle-wasm-pkg/castle_wasm';
//!
//! init_panic_hook();
//!
//! const transport = new CastleTransport();           // 既定設定
//! const tuned = new CastleTransport('{"chunkLength": 1000000}');
//!
//! // 送信: chunk 分割 → 暗号コアで封緘 → send
//! for (const frame of transport.makeFrames(plaintext, Date.now())) {
//!     transport.sendBytes(core.seal(frame));
//! }
//!
//! // 受信
//! if (!transport.offerIncomingCyphertext(raw, Date.now())) {
//!     const plain = core.open(raw);
//!     if (plain) transport.receive(raw, plain, author, Date.now());
//! }
//!
//! // イベントの取り出しと定期処理（1 秒ごと）
//! for (const event of JSON.parse(transport.drainEvents())) bus.trigger(event);
//! transport.tick(Date.now());
//! ```

use wasm_bindgen::prelude::*;

pub mod client;

pub use client::CastleTransport;

/// パニック時にブラウザコンソールにスタックトレースを出力する
///
/// 本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}
