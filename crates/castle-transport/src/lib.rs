//! # castle-transport
//!
//! Castle プロトコルのトランスポート層。
//!
//! 暗号コア（ハンドシェイク・ラチェット）とテキストしか運べない下位チャンネルの間に立ち、
//! 次のことを受け持つ:
//!
//! - 送信: cyphertext の Base64 化（任意で message id を前置）と send イベント発行
//! - 受信: interception の優先処理、chunk の再組み立て、鮮度判定、receive イベント発行
//! - 監査: 送受信 cyphertext のエコー（上限以上の長さのものは出さない）
//!
//! 外向きの作用はすべて [`SessionBus`] に流すイベントで表す。
//!
//! ```text
//! let (transport, mut events) = Transport::channel(TransportConfig::default());
//! transport.connect();
//! for frame in transport.make_frames(timestamp, b"hello") {
//!     transport.send(core.seal(&frame).into(), None)?;
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod event;
pub mod framer;
pub mod intercept;
pub mod transport;

pub use audit::CyphertextAuditor;
pub use config::{TransportConfig, CYPHERTEXT_LIMIT, DEFAULT_INTERCEPTION_TIMEOUT_MS};
pub use error::TransportError;
pub use event::{CastleEvent, SessionBridge, SessionBus, SessionEvent, LOCAL_USER};
pub use framer::{Cyphertext, OutgoingFramer};
pub use intercept::{Interception, InterceptionId, InterceptionQueue};
pub use transport::{EventReceiver, IncomingOutcome, TickReport, Transport};

pub use castle_frame::{MessageId, Timestamp};
