//! 送信タイムスタンプと鮮度ゲート
//!
//! 送信側はメッセージごとに単調増加の送信時刻（ミリ秒、小数部あり）を付ける。
//! 受信側は配信済みの最大タイムスタンプを保持し、それを超えないメッセージは黙って捨てる。

/// 送信側が付与するタイムスタンプ（ミリ秒）
///
/// 有限かつ非負の `f64`。同一ミリ秒内の 2 メッセージも順序付けられるよう
/// 小数部は丸めずに保持する。
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Timestamp(f64);

impl Timestamp {
    /// 鮮度ゲートの初期値（エポック）
    pub const EPOCH: Self = Timestamp(0.0);

    /// ミリ秒値からタイムスタンプを生成する
    ///
    /// NaN・無限大・負数は `None`。
    pub fn from_millis(ms: f64) -> Option<Self> {
        if ms.is_finite() && ms >= 0.0 {
            Some(Timestamp(ms))
        } else {
            None
        }
    }

    /// ミリ秒値を返す
    pub fn as_millis(&self) -> f64 {
        self.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::EPOCH
    }
}

/// 鮮度ゲート
///
/// Transport インスタンス（= 1 ペアワイズセッション）ごとに 1 つ。
/// 配信済みの最大タイムスタンプ（high-water mark）は決して減らない。
#[derive(Debug, Clone, Default)]
pub struct FreshnessGate {
    last_delivered: Timestamp,
}

impl FreshnessGate {
    /// high-water mark をエポックで初期化する
    pub fn new() -> Self {
        FreshnessGate {
            last_delivered: Timestamp::EPOCH,
        }
    }

    /// 配信してよいか判定し、よければ high-water mark を更新する
    ///
    /// # 戻り値
    /// - `true`: `timestamp` が現在の最大値を厳密に超えた（配信する）
    /// - `false`: 同じか古い（重複・順序逆転。エラーではなく破棄）
    pub fn admit(&mut self, timestamp: Timestamp) -> bool {
        if timestamp > self.last_delivered {
            self.last_delivered = timestamp;
            true
        } else {
            false
        }
    }

    /// 現在の high-water mark
    pub fn last_delivered(&self) -> Timestamp {
        self.last_delivered
    }
}
