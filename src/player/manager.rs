use crate::core::{
    log_ctx, ActionAtItemEnd, BoundedBuffer, BufferEvent, BufferObserver, BufferRole, BufferingStatistics, MediaFrame,
    MediaFrameType, MediaTime, PlaybackClock, PlaybackStatus, PlayerConfig, RendererState, Resolution, Result,
    SeekKind, SerialQueue, Timer, Variant,
};
use crate::player::decoder::{AudioOutputFormat, HeapSurfaceAllocator, SurfaceAllocator};
use crate::player::item::{ItemStatus, PlayerItem, VariantChange};
use crate::player::media_decoder::{DecodeTask, DecoderObserver, DecoderState, MediaDecoder, MediaDecoderConfig};
use crate::player::media_source::MediaSource;
use crate::renderer::{
    AudioBuffer, AudioEngine, AudioRenderer, MediaRenderer, MediaRendererDelegate, VideoRenderer, VideoSink,
    VideoTexture,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// 推送给宿主的播放器事件
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    IsPlayingChanged(bool),
    IsBufferingChanged(bool),
    BufferingStatisticsUpdated(BufferingStatistics),
    StreamSwitched(Variant),
    StreamSwitchFailed { variant: Variant, reason: String },
    ItemStatusChanged(ItemStatus),
    PresentationSizeChanged(Resolution),
    SeekStarted,
    SeekEnded,
    EndOfStream,
}

/// 管线中的四个有界缓冲区
pub struct BufferSet {
    pub video_frames: Arc<BoundedBuffer<MediaFrame>>,
    pub audio_frames: Arc<BoundedBuffer<MediaFrame>>,
    pub textures: Arc<BoundedBuffer<VideoTexture>>,
    pub pcm: Arc<BoundedBuffer<AudioBuffer>>,
}

impl BufferSet {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            video_frames: Arc::new(BoundedBuffer::new(BufferRole::VideoFrames, config.frame_buffer_capacity)),
            audio_frames: Arc::new(BoundedBuffer::new(BufferRole::AudioFrames, config.frame_buffer_capacity)),
            textures: Arc::new(BoundedBuffer::new(BufferRole::Textures, config.texture_buffer_capacity)),
            pcm: Arc::new(BoundedBuffer::new(BufferRole::Pcm, config.pcm_buffer_capacity)),
        }
    }

    pub fn frames(&self, medium: MediaFrameType) -> &Arc<BoundedBuffer<MediaFrame>> {
        match medium {
            MediaFrameType::Audio => &self.audio_frames,
            MediaFrameType::Video => &self.video_frames,
        }
    }

    pub fn flush_all(&self) {
        self.video_frames.flush();
        self.audio_frames.flush();
        self.textures.flush();
        self.pcm.flush();
    }

    /// 四个缓冲区（含溢出部分）同时为空
    pub fn all_empty(&self) -> bool {
        self.video_frames.len() == 0
            && self.audio_frames.len() == 0
            && self.textures.len() == 0
            && self.pcm.len() == 0
    }
}

/// 宿主提供的平台协作者
pub struct PlayerCollaborators {
    pub audio_engine: Arc<dyn AudioEngine>,
    pub video_sink: Arc<dyn VideoSink>,
    pub surface_allocator: Arc<dyn SurfaceAllocator>,
}

impl PlayerCollaborators {
    /// 使用默认的堆内存表面分配器
    pub fn new(audio_engine: Arc<dyn AudioEngine>, video_sink: Arc<dyn VideoSink>) -> Self {
        Self {
            audio_engine,
            video_sink,
            surface_allocator: Arc::new(HeapSurfaceAllocator::default()),
        }
    }
}

/// 自适应降级判定：位置在总时长 90% 之前，缓冲次数 ≥ 5，且缓冲时间占比 ≥ 0.3
pub fn should_downgrade(statistics: &BufferingStatistics, duration: f64, config: &PlayerConfig) -> bool {
    let playback_time = statistics.playback_time;
    if playback_time <= 0.0 || playback_time >= duration * config.downgrade_max_position_ratio {
        return false;
    }
    let ratio = statistics.total_buffering_time / playback_time;
    debug!(
        "降级判定: 缓冲 {} 次, 占比 {:.2}, 位置 {:.1}/{:.1}s",
        statistics.buffering_count, ratio, playback_time, duration
    );
    statistics.buffering_count >= config.downgrade_min_buffering_count && ratio >= config.downgrade_min_buffering_ratio
}

struct ManagerState {
    item: Option<Arc<PlayerItem>>,
    /// 每次替换条目递增，后台任务据此丢弃旧条目的结果
    item_generation: u64,
    status: PlaybackStatus,
    is_playback_started: bool,
    /// 播放被拆除过，下次启动需要把媒体源倒回开头
    needs_rewind: bool,
    rate: f64,
    default_rate: f64,
    volume: f32,
    is_muted: bool,
    /// seek 期间的内部静音，不影响 is_muted
    seek_muted: bool,
    source_fps: f64,
    start_time: f64,
    duration: f64,
    pending_seek: f64,
    end_of_stream_position: Option<MediaTime>,
    end_of_stream_timer: Option<Timer>,
}

/// 播放管理器 - 串联条目、解码编排器、渲染协调者与共享时钟
///
/// 负责背压循环（帧缓冲腾出空间 → 补解码请求）、seek、结束判定、自适应降级与变体切换。
/// 宿主通过 `events()` 接收状态变化，通过 `render_video_tick()` 驱动视频呈现。
pub struct PlaybackManager {
    weak_self: Weak<PlaybackManager>,
    config: PlayerConfig,
    clock: PlaybackClock,
    buffers: BufferSet,
    decoder: MediaDecoder,
    renderer: Arc<MediaRenderer>,
    decode_queue: SerialQueue,
    state: Mutex<ManagerState>,
    event_tx: Sender<PlayerEvent>,
    event_rx: Receiver<PlayerEvent>,
}

impl PlaybackManager {
    pub fn new(config: PlayerConfig, collaborators: PlayerCollaborators) -> Result<Arc<Self>> {
        config.validate()?;
        info!("{} 🎮 创建播放管理器...", log_ctx());

        let clock = PlaybackClock::new();
        let buffers = BufferSet::new(&config);
        let decoder = MediaDecoder::new(
            MediaDecoderConfig {
                hardware_acceleration: config.hardware_acceleration,
                audio_output: AudioOutputFormat {
                    sample_rate: config.output_sample_rate,
                    channels: config.output_channels,
                },
                seek_tolerance: config.seek_tolerance,
            },
            collaborators.surface_allocator,
        );
        let audio = AudioRenderer::new(
            collaborators.audio_engine,
            buffers.audio_frames.clone(),
            buffers.pcm.clone(),
            config.audio_schedule_target,
        );
        let video = VideoRenderer::new(
            clock.clone(),
            collaborators.video_sink,
            buffers.video_frames.clone(),
            buffers.textures.clone(),
            config.sync_threshold,
            config.texture_capacity_at_fps,
        );
        let renderer = MediaRenderer::new(
            clock.clone(),
            audio,
            video,
            Duration::from_secs_f64(config.buffering_check_interval),
        );
        let (event_tx, event_rx) = unbounded();
        let default_rate = config.default_rate;

        let manager = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            config,
            clock,
            buffers,
            decoder,
            renderer,
            decode_queue: SerialQueue::new("decode"),
            state: Mutex::new(ManagerState {
                item: None,
                item_generation: 0,
                status: PlaybackStatus::default(),
                is_playback_started: false,
                needs_rewind: false,
                rate: default_rate,
                default_rate,
                volume: 1.0,
                is_muted: false,
                seek_muted: false,
                source_fps: 0.0,
                start_time: 0.0,
                duration: 0.0,
                pending_seek: 0.0,
                end_of_stream_position: None,
                end_of_stream_timer: None,
            }),
            event_tx,
            event_rx,
        });
        manager.wire();
        info!("{} ✅ 播放管理器创建完成", log_ctx());
        Ok(manager)
    }

    /// 订阅各组件事件
    fn wire(&self) {
        let renderer_observer: Weak<dyn BufferObserver> = Arc::downgrade(&self.renderer) as Weak<dyn BufferObserver>;
        self.buffers.textures.subscribe(renderer_observer.clone());
        self.buffers.pcm.subscribe(renderer_observer);

        let buffer_observer: Weak<dyn BufferObserver> = self.weak_self.clone();
        self.buffers.video_frames.subscribe(buffer_observer.clone());
        self.buffers.audio_frames.subscribe(buffer_observer);

        let decoder_observer: Weak<dyn DecoderObserver> = self.weak_self.clone();
        self.decoder.set_observer(decoder_observer);

        let delegate: Weak<dyn MediaRendererDelegate> = self.weak_self.clone();
        self.renderer.set_delegate(delegate);
    }

    /// 宿主事件流
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.event_rx.clone()
    }

    fn emit(&self, event: PlayerEvent) {
        debug!("事件: {:?}", event);
        let _ = self.event_tx.send(event);
    }

    // ========== 条目 ==========

    /// 替换当前条目：拆除当前播放，在后台线程准备新条目
    pub fn replace_current_item(&self, item: Arc<PlayerItem>) {
        info!("{} 📼 替换当前条目: {}", log_ctx(), item.url());
        self.end_playback();
        let generation = {
            let mut state = self.state.lock();
            state.item = Some(item.clone());
            state.item_generation += 1;
            state.needs_rewind = false;
            state.item_generation
        };

        let weak = self.weak_self.clone();
        let condition = self.config.network_condition;
        let screen = self.config.screen_resolution;
        let spawned = thread::Builder::new().name("item-prepare".into()).spawn(move || {
            let result = item.prepare(condition, screen);
            if let Some(manager) = weak.upgrade() {
                manager.did_prepare_item(generation, &item, result);
            }
        });
        if let Err(e) = spawned {
            warn!("{} ⚠ 条目准备线程创建失败: {}", log_ctx(), e);
        }
    }

    fn did_prepare_item(&self, generation: u64, item: &PlayerItem, result: Result<Arc<MediaSource>>) {
        let should_open = {
            let state = self.state.lock();
            if state.item_generation != generation {
                debug!("条目已被替换，忽略准备结果");
                return;
            }
            state.is_playback_started
        };
        match result {
            Ok(source) => {
                self.emit(PlayerEvent::ItemStatusChanged(ItemStatus::ReadyToPlay));
                self.emit(PlayerEvent::PresentationSizeChanged(item.presentation_size()));
                if should_open {
                    self.open_media_source(source);
                }
            }
            Err(_) => self.emit(PlayerEvent::ItemStatusChanged(item.status())),
        }
    }

    pub fn current_item(&self) -> Option<Arc<PlayerItem>> {
        self.state.lock().item.clone()
    }

    // ========== 播放控制 ==========

    pub fn play(&self) {
        let (first_start, changed) = {
            let mut state = self.state.lock();
            let first_start = !state.is_playback_started;
            state.is_playback_started = true;
            let changed = !state.status.is_playing;
            state.status.is_playing = true;
            (first_start, changed)
        };
        info!("{} ▶ 播放", log_ctx());
        if first_start {
            self.start_playback();
        } else {
            self.renderer.start_rendering();
        }
        if changed {
            self.emit(PlayerEvent::IsPlayingChanged(true));
        }
    }

    pub fn pause(&self) {
        info!("{} ⏸ 暂停", log_ctx());
        self.renderer.pause_rendering();
        let changed = std::mem::replace(&mut self.state.lock().status.is_playing, false);
        if changed {
            self.emit(PlayerEvent::IsPlayingChanged(false));
        }
    }

    /// 停止播放并拆除解码；再次 play 会从头开始
    pub fn stop(&self) {
        self.end_playback();
    }

    fn start_playback(&self) {
        let Some(item) = self.current_item() else {
            warn!("{} ⚠ 没有当前条目，无法开始播放", log_ctx());
            return;
        };
        match item.media_source() {
            Some(source) => self.open_media_source(source),
            None => debug!("条目尚未就绪，准备完成后开始播放"),
        }
    }

    fn end_playback(&self) {
        info!("{} ⏹ 结束播放", log_ctx());
        let (was_playing, timer) = {
            let mut state = self.state.lock();
            let was_playing = state.status.is_playing;
            state.status.is_playing = false;
            state.status.is_seeking = false;
            state.is_playback_started = false;
            state.needs_rewind = true;
            state.end_of_stream_position = None;
            (was_playing, state.end_of_stream_timer.take())
        };
        drop(timer);

        // ========== 停止解码（交付锁内作废进行中的任务，之后不会再有旧帧写入） ==========
        self.decoder.hold_delivery(|| {
            self.decoder.stop_decoding();
            self.buffers.flush_all();
        });
        let weak = self.weak_self.clone();
        self.decode_queue.dispatch(move || {
            if let Some(manager) = weak.upgrade() {
                manager.decoder.reset();
            }
        });

        // ========== 拆除渲染并清空缓冲 ==========
        self.renderer.stop_rendering();
        self.renderer.reset();
        self.buffers.flush_all();

        if was_playing {
            self.emit(PlayerEvent::IsPlayingChanged(false));
        }
    }

    /// 绑定媒体源并发起首批解码请求
    fn open_media_source(&self, source: Arc<MediaSource>) {
        let video = source.video_stream();
        let audio = source.audio_stream();
        let source_fps = video.as_ref().map(|s| s.fps.as_f64()).unwrap_or(0.0);
        let start_time = video.as_ref().map(|s| s.start_time.seconds()).unwrap_or(0.0);
        let duration = source.media_duration().map(|d| d.seconds()).unwrap_or(0.0);
        let rewind = {
            let mut state = self.state.lock();
            state.source_fps = source_fps;
            state.start_time = start_time;
            state.duration = duration;
            std::mem::replace(&mut state.needs_rewind, false)
        };
        info!(
            "{} 🎬 打开媒体源 {}（{:.0} fps, 时长 {:.2}s, 起始 {:.3}s）",
            log_ctx(),
            source.url(),
            source_fps,
            duration,
            start_time
        );

        self.renderer.set_has_audio_stream(audio.is_some());
        self.clock.set_time_seconds(start_time);
        self.update_video_frame_rate();
        self.apply_volume();

        let media: Vec<MediaFrameType> = [(MediaFrameType::Video, video.is_some()), (MediaFrameType::Audio, audio.is_some())]
            .into_iter()
            .filter_map(|(medium, present)| present.then_some(medium))
            .collect();
        let weak = self.weak_self.clone();
        self.decode_queue.dispatch(move || {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if rewind {
                rewind_source(&source);
            }
            manager.decoder.open_media_source(source);
            for medium in media {
                let task = manager.decode_task(medium, manager.config.initial_decode_count);
                manager.decoder.enqueue_decode_task(task);
            }
            manager.decoder.start_decoding();
        });
    }

    // ========== 背压循环 ==========

    fn decode_task(&self, medium: MediaFrameType, count: usize) -> DecodeTask {
        let target = self.buffers.frames(medium).clone();
        let other = self.buffers.frames(medium.other()).clone();
        DecodeTask::new(medium, count, move |wanted, spillover| {
            target.add_items(wanted);
            other.add_items(spillover);
        })
    }

    /// 按 上限 - (未交付的解码请求 + 当前占用) 补解码请求
    fn top_up(&self, medium: MediaFrameType) {
        let weak = self.weak_self.clone();
        self.decode_queue.dispatch(move || {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if matches!(manager.decoder.state(), DecoderState::NoSource | DecoderState::Stopped) {
                return;
            }
            let has_stream = manager.decoder.media_source().is_some_and(|s| s.stream(medium).is_some());
            if !has_stream {
                return;
            }
            let buffer = manager.buffers.frames(medium);
            let pending = manager.decoder.enqueued_frames_count(medium);
            let need = buffer.max_size().saturating_sub(pending + buffer.len());
            if need == 0 {
                return;
            }
            debug!("补充{}解码请求 x{}（待交付 {}）", medium.as_str(), need, pending);
            let task = manager.decode_task(medium, need);
            manager.decoder.enqueue_decode_task(task);
        });
    }

    // ========== Seek ==========

    /// 跳转到 `seconds`（相对媒体起点）
    ///
    /// # 流程
    /// - 开始（在调用线程上同步完成）：静音、停止呈现、重置音频引擎、时钟对齐目标，
    ///   在交付锁内清空缓冲并定位解码器，然后重新补解码请求
    /// - 结束（两种媒体都解到目标附近）：下一帧忽略"提前"判定，恢复呈现与音量
    ///
    /// `SeekStarted` 在解码器开始定位之前发出，所以 `SeekEnded` 总在它之后。
    pub fn seek(&self, seconds: f64) {
        if self.decoder.media_source().is_none() {
            warn!("{} ⚠ 尚未打开媒体源，忽略 seek", log_ctx());
            return;
        }
        let (target, start_time, timer) = {
            let mut state = self.state.lock();
            let target = if state.duration > 0.0 {
                seconds.clamp(0.0, state.duration)
            } else {
                seconds.max(0.0)
            };
            state.pending_seek = target;
            state.status.is_seeking = true;
            state.seek_muted = true;
            state.end_of_stream_position = None;
            (target, state.start_time, state.end_of_stream_timer.take())
        };
        drop(timer);
        info!("{} 🎯 Seek 到 {:.3}s", log_ctx(), target);
        self.apply_volume();

        // ========== 停止呈现并重建音频引擎 ==========
        self.renderer.stop_rendering();
        self.renderer.audio().reset_player();
        self.renderer.discard_pending();
        self.renderer.set_decoding_ended(false);
        self.clock.set_time_seconds(target + start_time);
        self.emit(PlayerEvent::SeekStarted);

        // ========== 丢弃旧数据并定位 ==========
        let started = self.decoder.hold_delivery(|| {
            self.buffers.flush_all();
            self.decoder.seek_to(target, SeekKind::Default)
        });
        if !started {
            warn!("{} ⚠ 解码器无法 seek，恢复呈现", log_ctx());
            self.handle_seek_end();
            return;
        }

        // flush 不触发通知，需要主动补请求
        self.top_up(MediaFrameType::Video);
        self.top_up(MediaFrameType::Audio);
    }

    fn handle_seek_end(&self) {
        let is_playing = {
            let mut state = self.state.lock();
            state.status.is_seeking = false;
            state.seek_muted = false;
            state.status.is_playing
        };
        self.renderer.video().ignore_ahead_of_time_once();
        if is_playing {
            self.renderer.start_rendering();
        }
        self.apply_volume();
        self.emit(PlayerEvent::SeekEnded);
    }

    // ========== 结束判定 ==========

    fn check_end_of_stream(&self, pts: MediaTime) {
        let candidate = {
            let state = self.state.lock();
            let tolerance = self.config.end_of_stream_tolerance;
            let near = |position: f64| (pts.seconds() - position).abs() <= tolerance;
            let near_end_of_file = state.end_of_stream_position.is_some_and(|p| near(p.seconds()));
            let near_duration = state.duration > 0.0 && near(state.duration + state.start_time);
            near_end_of_file || near_duration
        };
        if candidate {
            self.debounce_end_of_stream();
        }
    }

    fn debounce_end_of_stream(&self) {
        let weak = self.weak_self.clone();
        let timer = Timer::once(Duration::from_secs_f64(self.config.end_of_stream_debounce), move || {
            if let Some(manager) = weak.upgrade() {
                manager.confirm_end_of_stream();
            }
        });
        let previous = self.state.lock().end_of_stream_timer.replace(timer);
        drop(previous);
    }

    fn confirm_end_of_stream(&self) {
        if !self.buffers.all_empty() {
            debug!("结束候选未确认：缓冲区仍有数据");
            return;
        }
        let timer = {
            let mut state = self.state.lock();
            state.end_of_stream_position = None;
            state.end_of_stream_timer.take()
        };
        drop(timer);
        info!("{} 🏁 播放结束（缓冲区已全部耗尽）", log_ctx());
        match self.config.action_at_item_end {
            ActionAtItemEnd::Pause => self.pause(),
            ActionAtItemEnd::Stop => self.end_playback(),
        }
        self.emit(PlayerEvent::EndOfStream);
    }

    // ========== 变体切换 ==========

    /// 设置首选峰值码率（0 = 自动），选中的变体变化时切换
    pub fn set_preferred_peak_bit_rate(&self, bit_rate: u64) {
        let Some(item) = self.current_item() else {
            return;
        };
        let change =
            item.set_preferred_peak_bit_rate(bit_rate, self.config.network_condition, self.config.screen_resolution);
        if let Some(change) = change {
            self.emit(PlayerEvent::PresentationSizeChanged(change.variant.resolution));
            self.switch_stream(item, change);
        }
    }

    /// 后台打开新变体，成功后在解码队列上切换；失败则恢复原变体
    fn switch_stream(&self, item: Arc<PlayerItem>, change: VariantChange) {
        self.renderer.reset_buffering_statistics();
        let generation = self.state.lock().item_generation;
        info!("{} 🔀 切换变体 → {} bps", log_ctx(), change.variant.bandwidth);

        let weak = self.weak_self.clone();
        let spawned = thread::Builder::new().name("variant-open".into()).spawn(move || {
            let opened = MediaSource::open(&change.variant.url, item.opener());
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if manager.state.lock().item_generation != generation {
                return;
            }
            match opened {
                Ok(source) => {
                    let source = Arc::new(source);
                    let weak = manager.weak_self.clone();
                    manager.decode_queue.dispatch(move || {
                        let Some(manager) = weak.upgrade() else {
                            return;
                        };
                        manager.decoder.switch_stream(source.clone());
                        item.replace_media_source(source);
                        manager.emit(PlayerEvent::StreamSwitched(change.variant));
                    });
                }
                Err(e) => {
                    warn!("{} ❌ 变体打开失败 {}: {}", log_ctx(), change.variant.url, e);
                    item.restore_variant(change.previous.clone());
                    if let Some(previous) = change.previous {
                        manager.emit(PlayerEvent::PresentationSizeChanged(previous.resolution));
                    }
                    manager.emit(PlayerEvent::StreamSwitchFailed {
                        variant: change.variant,
                        reason: e.to_string(),
                    });
                }
            }
        });
        if let Err(e) = spawned {
            warn!("{} ⚠ 变体切换线程创建失败: {}", log_ctx(), e);
        }
    }

    // ========== 速率 / 音量 / 帧率 ==========

    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    pub fn set_rate(&self, rate: f64) {
        let rate = self.config.clamp_rate(rate);
        self.state.lock().rate = rate;
        info!("{} ⏩ 播放速率: {:.2}x", log_ctx(), rate);
        self.renderer.set_playback_rate(rate);
        self.update_video_frame_rate();
    }

    pub fn default_rate(&self) -> f64 {
        self.state.lock().default_rate
    }

    pub fn set_default_rate(&self, rate: f64) {
        self.state.lock().default_rate = self.config.clamp_rate(rate);
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn set_volume(&self, volume: f32) {
        self.state.lock().volume = volume.clamp(0.0, 1.0);
        self.apply_volume();
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().is_muted
    }

    /// 静音不改变音量值，取消静音后恢复
    pub fn set_muted(&self, muted: bool) {
        self.state.lock().is_muted = muted;
        self.apply_volume();
    }

    fn apply_volume(&self) {
        let effective = {
            let state = self.state.lock();
            if state.is_muted || state.seek_muted {
                0.0
            } else {
                state.volume
            }
        };
        self.renderer.set_volume(effective);
    }

    fn update_video_frame_rate(&self) {
        let (source_fps, rate) = {
            let state = self.state.lock();
            (state.source_fps, state.rate)
        };
        if source_fps <= 0.0 {
            return;
        }
        self.renderer
            .set_video_frame_rate(self.config.clamp_frame_rate(source_fps, rate));
    }

    /// 宿主显示驱动应使用的帧率
    pub fn preferred_frames_per_second(&self) -> f64 {
        self.renderer.video().preferred_frames_per_second()
    }

    // ========== 查询 ==========

    /// 显示回调：选择并呈现本刻的视频纹理
    pub fn render_video_tick(&self) -> Option<VideoTexture> {
        self.renderer.video().draw_tick()
    }

    pub fn current_time(&self) -> MediaTime {
        self.clock.now()
    }

    /// 媒体时长（秒），未知时为 0
    pub fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.state.lock().status
    }

    pub fn renderer_state(&self) -> RendererState {
        self.renderer.renderer_state()
    }

    pub fn buffering_statistics(&self) -> BufferingStatistics {
        self.renderer.buffering_statistics()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }
}

/// 把媒体源倒回开头并清空编解码器内部缓冲
fn rewind_source(source: &MediaSource) {
    let Some(stream) = source.video_stream().or_else(|| source.audio_stream()) else {
        return;
    };
    let timestamp = stream.stream_ts_from_time(stream.start_time);
    if !source.seek(stream.index, timestamp, true) {
        warn!("{} ⚠ 媒体源倒回失败", log_ctx());
    }
    for context in [source.video_stream(), source.audio_stream()].into_iter().flatten() {
        context.codec.lock().flush_buffers();
    }
    debug!("媒体源已倒回 {}", stream.start_time);
}

impl BufferObserver for PlaybackManager {
    fn on_buffer_event(&self, role: BufferRole, event: BufferEvent) {
        let BufferEvent::Freed(_) = event else {
            return;
        };
        match role {
            BufferRole::VideoFrames => self.top_up(MediaFrameType::Video),
            BufferRole::AudioFrames => self.top_up(MediaFrameType::Audio),
            _ => {}
        }
    }
}

impl DecoderObserver for PlaybackManager {
    fn did_seek_start(&self, kind: SeekKind) {
        // Default seek 的准备工作已在 seek() 里同步完成
        debug!("seek 开始: {:?}", kind);
    }

    fn did_seek_end(&self, kind: SeekKind) {
        debug!("seek 结束: {:?}", kind);
        if kind == SeekKind::Default {
            self.handle_seek_end();
        }
    }

    fn did_find_end_of_file(&self, position: MediaTime) {
        self.state.lock().end_of_stream_position = Some(position);
        self.renderer.set_decoding_ended(true);
    }
}

impl MediaRendererDelegate for PlaybackManager {
    fn did_prepare_for_rendering(&self) {
        info!("{} ✅ 渲染已就绪", log_ctx());
        if self.state.lock().status.is_playing {
            self.renderer.start_rendering();
        }
    }

    fn did_render_frame(&self, pts: MediaTime) {
        // 有音频时以实际播放完的音频缓冲校正时钟
        if self.renderer.has_audio_stream() && !self.clock.is_paused() {
            let drift = pts.seconds() - self.clock.now_seconds();
            if drift.abs() > self.config.sync_threshold {
                debug!("时钟漂移 {:.3}s，对齐到音频 {}", drift, pts);
                self.clock.set_time(pts);
            }
        }
        self.check_end_of_stream(pts);
    }

    fn did_change_is_buffering(&self, is_buffering: bool) {
        self.state.lock().status.is_buffering = is_buffering;
        self.emit(PlayerEvent::IsBufferingChanged(is_buffering));
    }

    fn did_update_buffering_statistics(&self, statistics: BufferingStatistics) {
        let (start_time, duration, item) = {
            let state = self.state.lock();
            (state.start_time, state.duration, state.item.clone())
        };
        let statistics = BufferingStatistics {
            playback_time: (statistics.playback_time - start_time).max(0.0),
            ..statistics
        };
        self.emit(PlayerEvent::BufferingStatisticsUpdated(statistics));

        let Some(item) = item else {
            return;
        };
        if item.prefers_auto_quality() && should_downgrade(&statistics, duration, &self.config) {
            if let Some(change) = item.downgrade() {
                self.emit(PlayerEvent::PresentationSizeChanged(change.variant.resolution));
                self.switch_stream(item, change);
            }
        }
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.decoder.stop_decoding();
        info!("{} 🗑 播放管理器已释放", log_ctx());
    }
}
