use crate::core::time::MediaTime;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 主时钟在 MediaTime 中使用的 timescale（微秒）
pub const CLOCK_TIMESCALE: i32 = 1_000_000;

/// 播放时钟 - 用于音视频同步
///
/// 速率为 0 表示暂停；设置新速率或新时间都会重新锚定基准时刻。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_seconds: f64,     // 基准位置（秒）
    base_instant: Instant, // 基准时刻
    rate: f64,             // 当前速率（0 = 暂停）
}

impl ClockInner {
    fn now(&self) -> f64 {
        if self.rate == 0.0 {
            self.base_seconds
        } else {
            self.base_seconds + self.base_instant.elapsed().as_secs_f64() * self.rate
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_seconds: 0.0,
                base_instant: Instant::now(),
                rate: 0.0,
            })),
        }
    }

    /// 当前时钟时间（秒）
    pub fn now_seconds(&self) -> f64 {
        self.inner.lock().now()
    }

    /// 当前时钟时间（MediaTime）
    pub fn now(&self) -> MediaTime {
        MediaTime::from_seconds(self.now_seconds(), CLOCK_TIMESCALE)
    }

    /// 把时钟对齐到指定位置，保留当前速率
    pub fn set_time(&self, time: MediaTime) {
        self.set_time_seconds(time.seconds());
    }

    pub fn set_time_seconds(&self, seconds: f64) {
        let mut inner = self.inner.lock();
        inner.base_seconds = seconds;
        inner.base_instant = Instant::now();
    }

    /// 设置速率，0 即暂停
    pub fn set_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        let current = inner.now();
        inner.base_seconds = current;
        inner.base_instant = Instant::now();
        inner.rate = rate.max(0.0);
    }

    pub fn rate(&self) -> f64 {
        self.inner.lock().rate
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().rate == 0.0
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
