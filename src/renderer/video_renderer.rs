use crate::core::{
    log_ctx, BoundedBuffer, BufferEvent, BufferObserver, BufferRole, BufferingTask, DecodedSample, MediaFrame,
    MediaFrameType, MediaTime, PlaybackClock, SerialQueue, TaskQueue, VideoImage,
};
use crate::renderer::RendererObserver;
use log::{debug, info, trace};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// 纹理相对时钟的呈现时机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationTiming {
    OnTime,
    /// 时钟已超过 pts 一个阈值以上
    BehindTime,
    /// 时钟距 pts 还差一个阈值以上
    AheadOfTime,
}

/// 待呈现的视频纹理
#[derive(Debug, Clone)]
pub struct VideoTexture {
    pub image: Arc<VideoImage>,
    pub pts: MediaTime,
}

impl VideoTexture {
    pub fn from_frame(frame: MediaFrame) -> Option<Self> {
        let pts = frame.position();
        match frame.sample {
            DecodedSample::Video(image) => Some(Self {
                image: Arc::new(image),
                pts,
            }),
            DecodedSample::Audio(_) => None,
        }
    }

    pub fn timing(&self, now: MediaTime, threshold: f64) -> PresentationTiming {
        let difference = now.sub(self.pts).seconds();
        if difference > threshold {
            PresentationTiming::BehindTime
        } else if difference < -threshold {
            PresentationTiming::AheadOfTime
        } else {
            PresentationTiming::OnTime
        }
    }
}

/// GPU 呈现端（上传纹理并合成由宿主完成）
pub trait VideoSink: Send + Sync {
    fn present(&self, texture: &VideoTexture);
}

/// 视频渲染器 - 把解码帧转换为纹理，在每个显示刻按共享时钟选择要呈现的一帧
pub struct VideoRenderer {
    weak_self: Weak<VideoRenderer>,
    clock: PlaybackClock,
    sink: Arc<dyn VideoSink>,
    frames: Arc<BoundedBuffer<MediaFrame>>,
    textures: Arc<BoundedBuffer<VideoTexture>>,
    tasks: TaskQueue<BufferingTask>,
    queue: SerialQueue,
    sync_threshold: f64,
    texture_capacity_at_fps: usize,
    last_texture: Mutex<Option<VideoTexture>>,
    preferred_fps: Mutex<f64>,
    ignore_ahead_of_time_once: AtomicBool,
    is_paused: AtomicBool,
    is_buffer_ready: AtomicBool,
    buffer_epoch: AtomicU64,
    observer: RwLock<Option<Weak<dyn RendererObserver>>>,
}

impl VideoRenderer {
    pub fn new(
        clock: PlaybackClock,
        sink: Arc<dyn VideoSink>,
        frames: Arc<BoundedBuffer<MediaFrame>>,
        textures: Arc<BoundedBuffer<VideoTexture>>,
        sync_threshold: f64,
        texture_capacity_at_fps: usize,
    ) -> Arc<Self> {
        let renderer = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            clock,
            sink,
            frames,
            textures,
            tasks: TaskQueue::new(),
            queue: SerialQueue::new("video-render"),
            sync_threshold,
            texture_capacity_at_fps,
            last_texture: Mutex::new(None),
            preferred_fps: Mutex::new(0.0),
            ignore_ahead_of_time_once: AtomicBool::new(false),
            is_paused: AtomicBool::new(true),
            is_buffer_ready: AtomicBool::new(false),
            buffer_epoch: AtomicU64::new(0),
            observer: RwLock::new(None),
        });
        let observer: Weak<dyn BufferObserver> = renderer.weak_self.clone();
        renderer.frames.subscribe(observer.clone());
        renderer.textures.subscribe(observer);
        renderer
    }

    pub fn set_observer(&self, observer: Weak<dyn RendererObserver>) {
        *self.observer.write() = Some(observer);
    }

    fn observer(&self) -> Option<Arc<dyn RendererObserver>> {
        self.observer.read().as_ref().and_then(|o| o.upgrade())
    }

    pub fn is_buffer_ready(&self) -> bool {
        self.is_buffer_ready.load(Ordering::SeqCst)
    }

    pub fn set_buffer_ready(&self, ready: bool) {
        let was_ready = self.is_buffer_ready.swap(ready, Ordering::SeqCst);
        if ready && !was_ready {
            debug!("🖼 视频缓冲已就绪");
            if let Some(observer) = self.observer() {
                observer.buffer_became_ready(MediaFrameType::Video);
            }
        }
    }

    /// seek 之后调用：下一次"提前"判定强制前进一帧
    pub fn ignore_ahead_of_time_once(&self) {
        self.ignore_ahead_of_time_once.store(true, Ordering::SeqCst);
    }

    /// 暂停时显示刻不做任何事
    pub fn set_paused(&self, paused: bool) {
        self.is_paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::SeqCst)
    }

    /// 设置首选帧率；纹理缓冲同时收缩到较小容量
    pub fn set_preferred_frames_per_second(&self, fps: f64) {
        self.textures.set_max_size(self.texture_capacity_at_fps);
        *self.preferred_fps.lock() = fps;
        info!("{} 🎞 视频首选帧率: {:.0} fps", log_ctx(), fps);
    }

    pub fn preferred_frames_per_second(&self) -> f64 {
        *self.preferred_fps.lock()
    }

    pub fn last_presented(&self) -> Option<VideoTexture> {
        self.last_texture.lock().clone()
    }

    pub fn discard_pending(&self) {
        self.tasks.reset();
        self.buffer_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.discard_pending();
        self.is_buffer_ready.store(false, Ordering::SeqCst);
        self.ignore_ahead_of_time_once.store(false, Ordering::SeqCst);
        self.last_texture.lock().take();
    }

    pub fn wait_idle(&self) {
        self.queue.wait_idle();
    }

    // ========== 缓冲 ==========

    pub fn update_buffer(&self) {
        let weak = self.weak_self.clone();
        self.queue.dispatch(move || {
            let Some(r) = weak.upgrade() else {
                return;
            };
            let queued = r.tasks.sum_by(|t| t.count);
            let need = r
                .textures
                .max_size()
                .saturating_sub(queued + r.textures.len());
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
            let textures: Vec<VideoTexture> = frames.into_iter().filter_map(VideoTexture::from_frame).collect();
            if self.buffer_epoch.load(Ordering::SeqCst) != epoch {
                debug!("纹理缓冲任务结果已作废（{} 项）", textures.len());
                continue;
            }
            trace!("纹理缓冲任务: 请求 {} 得到 {}", task.count, textures.len());
            self.textures.add_items(textures);
        }
    }

    // ========== 呈现 ==========

    /// 显示刻：选择本刻要呈现的纹理并交给呈现端
    ///
    /// 缓冲为空时重复呈现上一帧；返回实际呈现的纹理。
    pub fn draw_tick(&self) -> Option<VideoTexture> {
        if self.is_paused() {
            return None;
        }
        let now = self.clock.now();
        let selected = self.select_texture(now);

        let mut last = self.last_texture.lock();
        let shown = match &selected {
            Some(texture) => Some(texture.clone()),
            None => last.clone(),
        };
        if let Some(texture) = &shown {
            self.sink.present(texture);
            *last = Some(texture.clone());
        }
        drop(last);

        if let Some(texture) = &selected {
            if let Some(observer) = self.observer() {
                observer.did_render(MediaFrameType::Video, texture.pts);
            }
        }
        shown
    }

    fn select_texture(&self, now: MediaTime) -> Option<VideoTexture> {
        let first = self.textures.first()?;
        match first.timing(now, self.sync_threshold) {
            PresentationTiming::OnTime => self.textures.take(),
            PresentationTiming::BehindTime => self.catch_up(&first, now),
            PresentationTiming::AheadOfTime => {
                if self.ignore_ahead_of_time_once.swap(false, Ordering::SeqCst) {
                    return self.textures.take();
                }
                // 有上一帧时保持（draw_tick 会重复呈现它）
                if self.last_texture.lock().is_some() {
                    None
                } else {
                    self.textures.take()
                }
            }
        }
    }

    /// 丢弃落后的纹理，直到找到不落后且不早于 `first` 的一帧；最后一帧总会被采用
    fn catch_up(&self, first: &VideoTexture, now: MediaTime) -> Option<VideoTexture> {
        while let Some(texture) = self.textures.take() {
            let is_last = self.textures.is_empty();
            let timing = texture.timing(now, self.sync_threshold);
            if (timing != PresentationTiming::BehindTime || is_last) && texture.pts >= first.pts {
                return Some(texture);
            }
            trace!("丢帧 pts={} 时钟={}", texture.pts, now);
        }
        None
    }
}

impl BufferObserver for VideoRenderer {
    fn on_buffer_event(&self, role: BufferRole, event: BufferEvent) {
        match (role, event) {
            (BufferRole::VideoFrames, BufferEvent::ItemsAdded) => self.update_buffer(),
            (BufferRole::Textures, BufferEvent::Filled) => self.set_buffer_ready(true),
            (BufferRole::Textures, BufferEvent::Freed(_)) => self.update_buffer(),
            _ => {}
        }
    }
}
