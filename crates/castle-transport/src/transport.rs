//! Castle Transport
//!
//! 1 つのペアワイズセッションが 1 つの Transport を排他的に所有する（セッション間で共有しない）。
//!
//! ## 受信の流れ
//!
//! ```text
//! 生 cyphertext ─→ InterceptionQueue ─(消費)→ 横取り側へ。ここで終了
//!                        │(待ちなし)
//!                        ↓
//!                 CyphertextAuditor（監査イベント）
//!                        ↓
//!          暗号コアが復号 → ChunkFrame::parse → ChunkReassembler
//!                        ↓(全 chunk 到着)
//!                  FreshnessGate ─(古い)→ 破棄
//!                        ↓
//!                 UTF-8 デコード ─(不正 / 空)→ 破棄
//!                        ↓
//!                SessionBridge::deliver（receive イベント）
//! ```
//!
//! ## 送信の流れ
//!
//! ```text
//! 平文 → make_frames（chunk 分割）→ 暗号コアが 1 frame ずつ暗号化
//!      → send: OutgoingFramer → CyphertextAuditor → SessionBridge::send
//! ```
//!
//! ## スレッド安全性
//!
//! 再組み立てテーブル・鮮度ゲート・interception キュー・Chunker は 1 つの Mutex で守る。
//! ロックは各操作の同期部分の間だけ保持し、`.await` をまたがない。

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use castle_frame::{ChunkFrame, ChunkReassembler, Chunker, FreshnessGate, Timestamp};
use serde::Serialize;
use tokio::sync::mpsc;
use zeroize::{Zeroize, Zeroizing};

use crate::audit::CyphertextAuditor;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::event::{SessionBridge, SessionBus, SessionEvent, LOCAL_USER};
use crate::framer::{Cyphertext, OutgoingFramer};
use crate::intercept::{Interception, InterceptionQueue};

/// 受信 1 件の処理結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IncomingOutcome {
    /// interception が消費した（監査・再組み立てはしていない）
    Intercepted,
    /// 暗号コアが開けなかった
    Unopened,
    /// chunk を受け付けた。メッセージはまだ揃っていない
    Pending,
    /// receive イベントを発行した
    Delivered { timestamp: Timestamp },
    /// 鮮度ゲートで破棄した
    Stale { timestamp: Timestamp },
    /// 完成したが UTF-8 として読めない、または空だった
    Undecodable { timestamp: Timestamp },
}

/// `Transport::channel` が返すイベントの受信側
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// `tick` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// タイムアウトで失敗させた interception 数
    pub expired_interceptions: usize,
    /// アイドル破棄した組み立て中メッセージ数
    pub evicted_messages: usize,
}

/// Mutex で守る可変状態
struct TransportState {
    reassembler: ChunkReassembler,
    freshness: FreshnessGate,
    interceptors: InterceptionQueue,
    chunker: Chunker,
}

/// Castle プロトコルのトランスポート層
pub struct Transport<B = mpsc::UnboundedSender<SessionEvent>> {
    state: Mutex<TransportState>,
    auditor: CyphertextAuditor,
    framer: OutgoingFramer,
    bridge: SessionBridge<B>,
    config: TransportConfig,
}

impl Transport<mpsc::UnboundedSender<SessionEvent>> {
    /// mpsc チャンネルをイベントバスにして生成する
    ///
    /// # 戻り値
    /// Transport と、セッションイベントを受け取る側
    pub fn channel(config: TransportConfig) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Transport::new(tx, config), rx)
    }
}

impl<B: SessionBus> Transport<B> {
    pub fn new(bus: B, config: TransportConfig) -> Self {
        Transport {
            state: Mutex::new(TransportState {
                reassembler: ChunkReassembler::with_limits(config.reassembly_limits()),
                freshness: FreshnessGate::new(),
                interceptors: InterceptionQueue::new(),
                chunker: Chunker::new(config.chunk_length),
            }),
            auditor: CyphertextAuditor::new(config.cyphertext_limit),
            framer: OutgoingFramer,
            bridge: SessionBridge::new(bus),
            config,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        self.bridge.bus()
    }

    /// connect イベントを発行する
    pub fn connect(&self) {
        self.bridge.connect();
    }

    /// abort イベントを発行する
    pub fn abort(&self) {
        self.bridge.abort();
    }

    /// cyphertext（Base64 テキスト）の監査イベントを発行する
    pub fn log_cyphertext(&self, cyphertext: &str, author: &str) {
        if let Some(event) = self.auditor.audit(cyphertext, author) {
            self.bridge.emit(event);
        }
    }

    // ===== Interception =====

    /// 次の生 cyphertext を横取りする登録を行う（時刻注入版）
    ///
    /// 期限は `tick` / `offer_incoming_cyphertext` に渡される `now_ms` で判定する。
    ///
    /// # 引数
    /// - `timeout_ms`: 期限。`None` は設定の既定値、`Some(0)` はタイムアウトなし
    /// - `now_ms`: 現在時刻
    pub fn intercept_incoming_cyphertext_at(
        &self,
        timeout_ms: Option<u64>,
        now_ms: u64,
    ) -> Interception {
        let timeout_ms = timeout_ms.unwrap_or(self.config.interception_timeout_ms);
        self.state().interceptors.register(timeout_ms, now_ms)
    }

    /// 次の生 cyphertext を横取りする（tokio タイマー版）
    ///
    /// タイムアウトしたら自分の登録をキューから取り除いてから
    /// `TransportError::InterceptionTimeout` を返す。自動で再登録はしない。
    /// `Duration::ZERO` はタイムアウトなし。
    pub async fn intercept_incoming_cyphertext(
        &self,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut interception = self.state().interceptors.register(0, 0);
        if timeout.is_zero() {
            return interception.await;
        }

        match tokio::time::timeout(timeout, &mut interception).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "cyphertext interception timed out");
                self.settle_timed_out(&mut interception)
            }
        }
    }

    /// タイマー切れの登録を取り消す
    ///
    /// タイマーと `offer` が競合し、登録が既にキューから取り出されていた場合は
    /// 送られた blob を返す（blob を失わない）。
    fn settle_timed_out(&self, interception: &mut Interception) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state();
        if state.interceptors.cancel(interception.id()) {
            return Err(TransportError::InterceptionTimeout);
        }
        // offer はロック内で送信するので、取り消せなければ結果は既に届いている
        drop(state);
        interception
            .try_take()
            .unwrap_or(Err(TransportError::InterceptionTimeout))
    }

    /// 受信した生 cyphertext を interception 待ちに渡す
    ///
    /// `true` のとき呼び出し側は処理を止める（監査も再組み立てもしない）。
    pub fn offer_incoming_cyphertext(&self, cyphertext: &[u8], now_ms: u64) -> bool {
        let consumed = self.state().interceptors.offer(cyphertext, now_ms);
        if consumed {
            tracing::debug!(len = cyphertext.len(), "incoming cyphertext intercepted");
        }
        consumed
    }

    // ===== 受信 =====

    /// 受信の全処理（interception → 復号 → 再組み立て → 鮮度判定 → 配信）
    ///
    /// # 引数
    /// - `cyphertext`: チャンネルから届いた生 cyphertext
    /// - `author`: 送信者
    /// - `now_ms`: 現在時刻
    /// - `open`: 暗号コアによる復号。開けなければ `None`
    pub fn handle_incoming<F>(
        &self,
        cyphertext: &[u8],
        author: &str,
        now_ms: u64,
        open: F,
    ) -> Result<IncomingOutcome, TransportError>
    where
        F: FnOnce(&[u8]) -> Option<Zeroizing<Vec<u8>>>,
    {
        if self.offer_incoming_cyphertext(cyphertext, now_ms) {
            return Ok(IncomingOutcome::Intercepted);
        }

        let Some(plaintext) = open(cyphertext) else {
            tracing::debug!(len = cyphertext.len(), "incoming cyphertext could not be opened");
            return Ok(IncomingOutcome::Unopened);
        };

        self.receive(cyphertext, plaintext, author, now_ms)
    }

    /// 復号済みの chunk frame を処理する
    ///
    /// # 引数
    /// - `cyphertext`: 監査用の元 cyphertext
    /// - `plaintext`: 復号済み chunk frame。処理後（どの経路でも）ゼロクリアされる
    ///
    /// # エラー
    /// - `TransportError::Protocol`: chunk がプロトコル違反。その message id は破棄される
    pub fn receive(
        &self,
        cyphertext: &[u8],
        plaintext: Zeroizing<Vec<u8>>,
        author: &str,
        now_ms: u64,
    ) -> Result<IncomingOutcome, TransportError> {
        if let Some(event) = self.auditor.audit_bytes(cyphertext, author) {
            self.bridge.emit(event);
        }

        let frame = ChunkFrame::parse(&plaintext).inspect_err(|err| {
            tracing::warn!(error = %err, len = plaintext.len(), "malformed chunk frame");
        })?;
        let id = frame.header.id;

        let (completed, admitted) = {
            let mut state = self.state();
            match state.reassembler.ingest(&frame, now_ms) {
                Ok(Some(completed)) => {
                    let admitted = state.freshness.admit(completed.timestamp);
                    (completed, admitted)
                }
                Ok(None) => {
                    tracing::trace!(
                        id = id.as_f64(),
                        offset = frame.header.chunk_index,
                        len = frame.payload.len(),
                        "chunk stored"
                    );
                    return Ok(IncomingOutcome::Pending);
                }
                Err(err) => {
                    tracing::warn!(id = id.as_f64(), error = %err, "chunk rejected, message abandoned");
                    return Err(err.into());
                }
            }
        };
        drop(plaintext);

        let timestamp = completed.timestamp;
        if !admitted {
            tracing::debug!(id = id.as_f64(), timestamp = timestamp.as_millis(), "stale message dropped");
            return Ok(IncomingOutcome::Stale { timestamp });
        }

        match decode_text(completed.data) {
            Some(text) => {
                self.bridge.deliver(author, timestamp, text);
                Ok(IncomingOutcome::Delivered { timestamp })
            }
            None => {
                tracing::debug!(id = id.as_f64(), timestamp = timestamp.as_millis(), "undecodable message dropped");
                Ok(IncomingOutcome::Undecodable { timestamp })
            }
        }
    }

    // ===== 送信 =====

    /// 平文メッセージを chunk frame 列に分割する
    ///
    /// 各 frame を暗号コアが暗号化し、その cyphertext を `send` に渡す。
    pub fn make_frames(&self, timestamp: Timestamp, message: &[u8]) -> Vec<Zeroizing<Vec<u8>>> {
        self.state().chunker.make_frames(timestamp, message)
    }

    /// 暗号化済み cyphertext を送信する
    ///
    /// Base64 blob を組み立て、ローカルユーザー名義で監査し、send イベントを発行する。
    pub fn send(
        &self,
        cyphertext: Cyphertext,
        message_id: Option<&[u8]>,
    ) -> Result<(), TransportError> {
        let blob = self.framer.frame(cyphertext, message_id)?;
        self.log_cyphertext(&blob, LOCAL_USER);
        self.bridge.send(blob);
        Ok(())
    }

    // ===== 保守 =====

    /// 定期処理: 期限切れ interception の失敗と、アイドルな組み立て中メッセージの破棄
    ///
    /// WASM では JS の `setInterval` から呼び出す。
    pub fn tick(&self, now_ms: u64) -> TickReport {
        let mut state = self.state();
        let report = TickReport {
            expired_interceptions: state.interceptors.expire(now_ms),
            evicted_messages: state.reassembler.evict_idle(now_ms),
        };
        if report.evicted_messages > 0 {
            tracing::warn!(evicted = report.evicted_messages, "idle partial messages evicted");
        }
        report
    }

    /// 期限切れの interception だけを失敗させる
    ///
    /// WASM 側が登録ごとに仕掛ける JS タイマーから呼ばれる。
    pub fn expire_interceptions(&self, now_ms: u64) -> usize {
        self.state().interceptors.expire(now_ms)
    }

    /// 組み立て中のメッセージ数
    pub fn pending_messages(&self) -> usize {
        self.state().reassembler.pending_count()
    }

    /// キューに残っている interception 数
    pub fn pending_interceptions(&self) -> usize {
        self.state().interceptors.len()
    }

    /// 配信済みの最大タイムスタンプ
    pub fn last_delivered(&self) -> Timestamp {
        self.state().freshness.last_delivered()
    }

    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 完成バッファを UTF-8 テキストにする
///
/// 読めない・空のときは `None`。どちらの場合もバッファはゼロクリアされる。
fn decode_text(mut data: Zeroizing<Vec<u8>>) -> Option<String> {
    let bytes = std::mem::take(&mut *data);
    match String::from_utf8(bytes) {
        Ok(text) if !text.is_empty() => Some(text),
        Ok(_) => None,
        Err(err) => {
            err.into_bytes().zeroize();
            None
        }
    }
}
