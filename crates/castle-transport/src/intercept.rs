//! 受信 cyphertext の横取り（interception）
//!
//! ハンドシェイク層が「次に届く生の cyphertext」を通常処理より先に受け取るための仕組み。
//! 登録は FIFO で、1 つの登録は高々 1 回だけ blob を受け取る。
//! 登録ごとに独立した期限を持ち、期限切れの登録は失敗で解決されてキューから外れる。
//!
//! 期限は `now_ms`（WASM では JS の `Date.now()`）で判定する。
//! ネイティブ環境では `Transport::intercept_incoming_cyphertext` が
//! tokio のタイマーで待ち、タイムアウト時に自分の登録を取り消す。

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::TransportError;

type InterceptResult = Result<Vec<u8>, TransportError>;

/// 登録の識別子（取り消し用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptionId(u64);

/// キュー内の登録
struct PendingInterception {
    id: InterceptionId,
    /// 期限（ミリ秒）。`None` はタイムアウトなし
    deadline_ms: Option<u64>,
    tx: oneshot::Sender<InterceptResult>,
}

impl PendingInterception {
    fn is_overdue(&self, now_ms: u64) -> bool {
        self.deadline_ms.is_some_and(|deadline| now_ms >= deadline)
    }
}

/// 横取りした blob を待つ Future
///
/// 解決経路は「blob が届く」か「期限切れ / 取り消し」の 2 つだけ。
/// Drop するとキュー側の登録は次の `offer` / `expire` で掃除される。
pub struct Interception {
    id: InterceptionId,
    rx: oneshot::Receiver<InterceptResult>,
}

impl Interception {
    pub fn id(&self) -> InterceptionId {
        self.id
    }

    /// 既に届いている結果を待たずに取り出す（未解決なら `None`）
    pub fn try_take(&mut self) -> Option<InterceptResult> {
        self.rx.try_recv().ok()
    }
}

impl Future for Interception {
    type Output = InterceptResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TransportError::InterceptionCancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// 横取り登録の FIFO キュー
pub struct InterceptionQueue {
    pending: VecDeque<PendingInterception>,
    next_id: u64,
}

impl InterceptionQueue {
    pub fn new() -> Self {
        InterceptionQueue {
            pending: VecDeque::new(),
            next_id: 1,
        }
    }

    /// 次の生 cyphertext を待つ登録を追加する
    ///
    /// # 引数
    /// - `timeout_ms`: 期限（0 でタイムアウトなし）
    /// - `now_ms`: 現在時刻
    pub fn register(&mut self, timeout_ms: u64, now_ms: u64) -> Interception {
        let id = InterceptionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        let deadline_ms = (timeout_ms != 0).then(|| now_ms.saturating_add(timeout_ms));
        self.pending.push_back(PendingInterception { id, deadline_ms, tx });

        Interception { id, rx }
    }

    /// 受信した生 cyphertext を最も古い有効な登録に渡す
    ///
    /// 期限切れの登録と、受け手が既に Drop された登録は読み飛ばして捨てる。
    ///
    /// # 戻り値
    /// - `true`: 登録が消費した（受信処理はここで止める）
    /// - `false`: 待っている登録がない（通常処理へ進む）
    pub fn offer(&mut self, raw: &[u8], now_ms: u64) -> bool {
        self.expire(now_ms);

        while let Some(entry) = self.pending.pop_front() {
            if entry.tx.is_closed() {
                continue;
            }
            if entry.tx.send(Ok(raw.to_vec())).is_ok() {
                return true;
            }
        }
        false
    }

    /// 期限切れの登録をタイムアウトで失敗させて取り除く
    ///
    /// # 戻り値
    /// 失敗させた件数
    pub fn expire(&mut self, now_ms: u64) -> usize {
        if !self.pending.iter().any(|entry| entry.is_overdue(now_ms)) {
            return 0;
        }

        let (overdue, live): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|entry| entry.is_overdue(now_ms));
        self.pending = live;

        let count = overdue.len();
        for entry in overdue {
            let _ = entry.tx.send(Err(TransportError::InterceptionTimeout));
        }
        count
    }

    /// 登録を取り消す
    pub fn cancel(&mut self, id: InterceptionId) -> bool {
        match self.pending.iter().position(|entry| entry.id == id) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    /// キューに残っている登録数（受け手が Drop 済みのものを含む）
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for InterceptionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::task::{Wake, Waker};

    struct NoopWake;

    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    /// 解決済みの Future から結果を取り出す（未解決なら None）
    fn poll_now(interception: &mut Interception) -> Option<InterceptResult> {
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        match Pin::new(interception).poll(&mut cx) {
            Poll::Ready(result) => Some(result),
            Poll::Pending => None,
        }
    }

    #[test]
    fn test_offer_without_interceptor() {
        let mut queue = InterceptionQueue::new();
        assert!(!queue.offer(b"blob", 0));
    }

    #[test]
    fn test_offer_resolves_oldest_first() {
        let mut queue = InterceptionQueue::new();
        let mut first = queue.register(0, 0);
        let mut second = queue.register(0, 0);

        assert!(queue.offer(b"one", 10));
        assert_eq!(poll_now(&mut first), Some(Ok(b"one".to_vec())));
        assert_eq!(poll_now(&mut second), None);

        assert!(queue.offer(b"two", 20));
        assert_eq!(poll_now(&mut second), Some(Ok(b"two".to_vec())));

        // 各登録は 1 回だけ
        assert!(!queue.offer(b"three", 30));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_expire_fails_overdue_entries() {
        let mut queue = InterceptionQueue::new();
        let mut short = queue.register(100, 0);
        let mut long = queue.register(1_000, 0);

        assert_eq!(queue.expire(99), 0);
        assert_eq!(queue.expire(100), 1);
        assert_eq!(poll_now(&mut short), Some(Err(TransportError::InterceptionTimeout)));
        assert_eq!(poll_now(&mut long), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_expired_entry_does_not_consume_later_blob() {
        let mut queue = InterceptionQueue::new();
        let mut stale = queue.register(100, 0);

        // 期限後に届いた blob は期限切れの登録には渡らない
        assert!(!queue.offer(b"late", 150));
        assert_eq!(poll_now(&mut stale), Some(Err(TransportError::InterceptionTimeout)));
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let mut queue = InterceptionQueue::new();
        let mut waiting = queue.register(0, 0);

        assert_eq!(queue.expire(u64::MAX), 0);
        assert!(queue.offer(b"blob", u64::MAX));
        assert_eq!(poll_now(&mut waiting), Some(Ok(b"blob".to_vec())));
    }

    #[test]
    fn test_dropped_interception_is_skipped() {
        let mut queue = InterceptionQueue::new();
        let dropped = queue.register(0, 0);
        let mut live = queue.register(0, 0);
        drop(dropped);

        assert!(queue.offer(b"blob", 0));
        assert_eq!(poll_now(&mut live), Some(Ok(b"blob".to_vec())));
    }

    #[test]
    fn test_try_take() {
        let mut queue = InterceptionQueue::new();
        let mut waiting = queue.register(0, 0);

        assert_eq!(waiting.try_take(), None);
        assert!(queue.offer(b"blob", 0));
        assert_eq!(waiting.try_take(), Some(Ok(b"blob".to_vec())));
        assert_eq!(waiting.try_take(), None);
    }

    #[test]
    fn test_cancel() {
        let mut queue = InterceptionQueue::new();
        let mut cancelled = queue.register(0, 0);
        let id = cancelled.id();

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(!queue.offer(b"blob", 0));
        assert_eq!(poll_now(&mut cancelled), Some(Err(TransportError::InterceptionCancelled)));
    }
}
