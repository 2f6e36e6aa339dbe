use crate::core::{
    log_ctx, BoundedBuffer, BufferEvent, BufferObserver, BufferRole, BufferState, BufferingTask, DecodedSample,
    MediaFrame, MediaFrameType, MediaTime, Result, SerialQueue, TaskQueue,
};
use crate::renderer::RendererObserver;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// 可直接交给音频引擎的 PCM 缓冲（f32 交错）
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub pts: MediaTime,
}

impl AudioBuffer {
    /// S16 → f32（除以 i16::MAX）
    pub fn from_frame(frame: &MediaFrame) -> Option<Self> {
        if frame.frame_type != MediaFrameType::Audio {
            return None;
        }
        match &frame.sample {
            DecodedSample::Audio(pcm) if !pcm.data.is_empty() => Some(Self {
                samples: pcm.data.iter().map(|s| *s as f32 / i16::MAX as f32).collect(),
                sample_rate: pcm.sample_rate,
                channels: pcm.channels,
                pts: frame.position(),
            }),
            _ => None,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// 缓冲播放完毕的回调
pub type PlayedCallback = Box<dyn FnOnce() + Send + 'static>;

/// 平台音频图（播放节点 + 变速 + 混音）
///
/// 所有方法都可能在渲染队列之外被调用，实现需自行保证线程安全。
pub trait AudioEngine: Send + Sync {
    fn play(&self) -> Result<()>;

    fn pause(&self);

    fn stop(&self);

    /// 丢弃所有已调度的缓冲并重建音频图
    fn reset(&self);

    /// 调度一个缓冲；播放完毕后调用 `on_played`
    fn schedule(&self, buffer: AudioBuffer, on_played: PlayedCallback);

    fn set_rate(&self, rate: f32);

    fn set_volume(&self, volume: f32);
}

/// 引擎调度计数
struct ScheduleState {
    scheduled: usize,
    /// 期望保持调度的缓冲数；reset 后为 0，play 后恢复
    target: usize,
    enabled: bool,
    /// reset 时递增，旧缓冲的完成回调据此忽略
    epoch: u64,
}

impl ScheduleState {
    fn state(&self) -> BufferState {
        if self.scheduled < self.target {
            BufferState::NeedCount(self.target - self.scheduled)
        } else {
            BufferState::Full
        }
    }
}

/// 音频渲染器 - 从音频帧缓冲拉取帧，转换为 PCM 缓冲，并保持引擎中有足够的已调度缓冲
pub struct AudioRenderer {
    weak_self: Weak<AudioRenderer>,
    engine: Arc<dyn AudioEngine>,
    frames: Arc<BoundedBuffer<MediaFrame>>,
    pcm: Arc<BoundedBuffer<AudioBuffer>>,
    tasks: TaskQueue<BufferingTask>,
    queue: SerialQueue,
    schedule: Mutex<ScheduleState>,
    schedule_target: usize,
    is_buffer_ready: AtomicBool,
    /// 丢弃时递增，进行中的缓冲任务据此丢弃结果
    buffer_epoch: AtomicU64,
    observer: RwLock<Option<Weak<dyn RendererObserver>>>,
}

impl AudioRenderer {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        frames: Arc<BoundedBuffer<MediaFrame>>,
        pcm: Arc<BoundedBuffer<AudioBuffer>>,
        schedule_target: usize,
    ) -> Arc<Self> {
        let renderer = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            engine,
            frames,
            pcm,
            tasks: TaskQueue::new(),
            queue: SerialQueue::new("audio-render"),
            schedule: Mutex::new(ScheduleState {
                scheduled: 0,
                target: schedule_target,
                enabled: true,
                epoch: 0,
            }),
            schedule_target,
            is_buffer_ready: AtomicBool::new(false),
            buffer_epoch: AtomicU64::new(0),
            observer: RwLock::new(None),
        });
        let observer: Weak<dyn BufferObserver> = renderer.weak_self.clone();
        renderer.frames.subscribe(observer.clone());
        renderer.pcm.subscribe(observer);
        renderer
    }

    pub fn set_observer(&self, observer: Weak<dyn RendererObserver>) {
        *self.observer.write() = Some(observer);
    }

    pub fn is_buffer_ready(&self) -> bool {
        self.is_buffer_ready.load(Ordering::SeqCst)
    }

    /// 设置就绪标志；未就绪 → 就绪 时通知观察者
    pub fn set_buffer_ready(&self, ready: bool) {
        let was_ready = self.is_buffer_ready.swap(ready, Ordering::SeqCst);
        if ready && !was_ready {
            debug!("🔊 音频缓冲已就绪");
            if let Some(observer) = self.observer() {
                observer.buffer_became_ready(MediaFrameType::Audio);
            }
        }
    }

    /// 引擎中已调度数量降到目标的一半及以下
    pub fn needs_buffering(&self) -> bool {
        let schedule = self.schedule.lock();
        schedule.scheduled <= schedule.target / 2
    }

    pub fn scheduled_count(&self) -> usize {
        self.schedule.lock().scheduled
    }

    fn observer(&self) -> Option<Arc<dyn RendererObserver>> {
        self.observer.read().as_ref().and_then(|o| o.upgrade())
    }

    /// 在渲染队列上执行
    fn run_on_queue<F>(&self, job: F)
    where
        F: FnOnce(&AudioRenderer) + Send + 'static,
    {
        let weak = self.weak_self.clone();
        self.queue.dispatch(move || {
            if let Some(renderer) = weak.upgrade() {
                job(&renderer);
            }
        });
    }

    // ========== 引擎控制 ==========

    pub fn start_player(&self) {
        self.run_on_queue(|r| {
            {
                let mut schedule = r.schedule.lock();
                schedule.target = r.schedule_target;
                schedule.enabled = true;
            }
            if let Err(e) = r.engine.play() {
                warn!("{} ⚠ 音频引擎启动失败: {}", log_ctx(), e);
            }
            r.update_schedule();
        });
    }

    pub fn pause_player(&self) {
        self.run_on_queue(|r| r.engine.pause());
    }

    pub fn stop_player(&self) {
        self.run_on_queue(|r| r.engine.stop());
    }

    /// 重建引擎：已调度的缓冲全部作废，调度目标归零直到下一次 play
    pub fn reset_player(&self) {
        self.run_on_queue(|r| {
            {
                let mut schedule = r.schedule.lock();
                schedule.enabled = false;
                schedule.target = 0;
                schedule.scheduled = 0;
                schedule.epoch += 1;
            }
            r.engine.reset();
            info!("{} 🔄 音频引擎已重置", log_ctx());
        });
    }

    pub fn set_rate(&self, rate: f32) {
        self.run_on_queue(move |r| r.engine.set_rate(rate));
    }

    pub fn set_volume(&self, volume: f32) {
        self.run_on_queue(move |r| r.engine.set_volume(volume.clamp(0.0, 1.0)));
    }

    /// 丢弃排队中的缓冲任务，进行中的任务结果作废
    pub fn discard_pending(&self) {
        self.tasks.reset();
        self.buffer_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.discard_pending();
        self.is_buffer_ready.store(false, Ordering::SeqCst);
    }

    /// 等待渲染队列上已提交的工作完成
    pub fn wait_idle(&self) {
        self.queue.wait_idle();
    }

    // ========== 缓冲 ==========

    /// 按 上限 - (排队任务量 + 当前占用) 补充 PCM 缓冲
    pub fn update_buffer(&self) {
        self.run_on_queue(|r| {
            let queued = r.tasks.sum_by(|t| t.count);
            let need = r
                .pcm
                .max_size()
                .saturating_sub(queued + r.pcm.len());
            if need == 0 {
                return;
            }
            if r.tasks.enqueue(BufferingTask { count: need }) {
                r.run_buffering_tasks();
            }
        });
    }

    fn run_buffering_tasks(&self) {
        while let Some(task) = self.tasks.dequeue() {
            let epoch = self.buffer_epoch.load(Ordering::SeqCst);
            let frames = self.frames.take_items(task.count).unwrap_or_default();
            let buffers: Vec<AudioBuffer> = frames.iter().filter_map(AudioBuffer::from_frame).collect();
            if self.buffer_epoch.load(Ordering::SeqCst) != epoch {
                debug!("音频缓冲任务结果已作废（{} 项）", buffers.len());
                continue;
            }
            trace!("音频缓冲任务: 请求 {} 得到 {}", task.count, buffers.len());
            self.pcm.add_items(buffers);
        }
    }

    /// 把 PCM 缓冲交给引擎直到达到调度目标
    fn update_schedule(&self) {
        let (count, epoch) = {
            let schedule = self.schedule.lock();
            if !schedule.enabled {
                return;
            }
            let BufferState::NeedCount(count) = schedule.state() else {
                return;
            };
            (count, schedule.epoch)
        };
        // take_items 会同步通知观察者，不能持有调度锁
        let Some(buffers) = self.pcm.take_items(count) else {
            return;
        };
        {
            let mut schedule = self.schedule.lock();
            if schedule.epoch != epoch {
                return;
            }
            schedule.scheduled += buffers.len();
        }
        if buffers.len() < count && self.pcm.is_empty() {
            trace!("PCM 缓冲不足: 需要 {} 得到 {}", count, buffers.len());
            if let Some(observer) = self.observer() {
                observer.buffer_ran_dry(MediaFrameType::Audio);
            }
        }

        for buffer in buffers {
            let pts = buffer.pts;
            let weak = self.weak_self.clone();
            self.engine.schedule(
                buffer,
                Box::new(move || {
                    if let Some(renderer) = weak.upgrade() {
                        renderer.buffer_played(epoch, pts);
                    }
                }),
            );
        }
    }

    fn buffer_played(&self, epoch: u64, pts: MediaTime) {
        let freed = {
            let mut schedule = self.schedule.lock();
            if schedule.epoch != epoch {
                return;
            }
            let old = schedule.scheduled;
            schedule.scheduled = old.saturating_sub(1);
            schedule.scheduled < schedule.target && old > schedule.scheduled
        };
        if let Some(observer) = self.observer() {
            observer.did_render(MediaFrameType::Audio, pts);
        }
        if freed {
            self.run_on_queue(|r| r.update_schedule());
        }
    }
}

impl BufferObserver for AudioRenderer {
    fn on_buffer_event(&self, role: BufferRole, event: BufferEvent) {
        match (role, event) {
            (BufferRole::AudioFrames, BufferEvent::ItemsAdded) => self.update_buffer(),
            (BufferRole::Pcm, BufferEvent::Filled) => self.run_on_queue(|r| r.set_buffer_ready(true)),
            (BufferRole::Pcm, BufferEvent::ItemsAdded) => self.run_on_queue(|r| r.update_schedule()),
            (BufferRole::Pcm, BufferEvent::Freed(_)) => self.update_buffer(),
            _ => {}
        }
    }
}
