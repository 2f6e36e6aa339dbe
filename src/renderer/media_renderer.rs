use crate::core::{
    log_ctx, BufferEvent, BufferObserver, BufferRole, BufferingStatistics, MediaFrameType, MediaTime, PlaybackClock,
    RendererState, Timer,
};
use crate::renderer::{AudioRenderer, RendererObserver, VideoRenderer};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// 渲染协调者对播放器的回调
pub trait MediaRendererDelegate: Send + Sync {
    /// 首次（或重置后）两路缓冲都已就绪
    fn did_prepare_for_rendering(&self) {}
    /// 主时间线上的一帧被呈现（有音频时来自音频，否则来自视频）
    fn did_render_frame(&self, _pts: MediaTime) {}
    fn did_change_is_buffering(&self, _is_buffering: bool) {}
    /// 一次缓冲结束后的累计统计
    fn did_update_buffering_statistics(&self, _statistics: BufferingStatistics) {}
}

struct RendererStateInner {
    renderer_state: RendererState,
    is_buffering: bool,
    has_audio_stream: bool,
    rate: f64,
    buffering_count: u32,
    total_buffering_time: f64,
    buffering_started: Option<Instant>,
    buffering_timer: Option<Timer>,
}

/// 渲染协调者 - 汇总两路渲染器的就绪/耗尽状态，控制缓冲检测与共享时钟的启停
pub struct MediaRenderer {
    weak_self: Weak<MediaRenderer>,
    clock: PlaybackClock,
    audio: Arc<AudioRenderer>,
    video: Arc<VideoRenderer>,
    state: Mutex<RendererStateInner>,
    decoding_ended: AtomicBool,
    check_interval: Duration,
    delegate: RwLock<Option<Weak<dyn MediaRendererDelegate>>>,
}

/// 状态锁释放后要执行的动作
enum Followup {
    None,
    Prepared,
    BufferingStopped(BufferingStatistics),
}

impl MediaRenderer {
    pub fn new(
        clock: PlaybackClock,
        audio: Arc<AudioRenderer>,
        video: Arc<VideoRenderer>,
        check_interval: Duration,
    ) -> Arc<Self> {
        let renderer = Arc::new_cyclic(|weak_self: &Weak<MediaRenderer>| Self {
            weak_self: weak_self.clone(),
            clock,
            audio,
            video,
            state: Mutex::new(RendererStateInner {
                renderer_state: RendererState::Unprepared,
                is_buffering: false,
                has_audio_stream: true,
                rate: 1.0,
                buffering_count: 0,
                total_buffering_time: 0.0,
                buffering_started: None,
                buffering_timer: None,
            }),
            decoding_ended: AtomicBool::new(false),
            check_interval,
            delegate: RwLock::new(None),
        });
        let observer: Weak<dyn RendererObserver> = renderer.weak_self.clone();
        renderer.audio.set_observer(observer.clone());
        renderer.video.set_observer(observer);
        renderer
    }

    pub fn set_delegate(&self, delegate: Weak<dyn MediaRendererDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    fn delegate(&self) -> Option<Arc<dyn MediaRendererDelegate>> {
        self.delegate.read().as_ref().and_then(|d| d.upgrade())
    }

    pub fn audio(&self) -> &Arc<AudioRenderer> {
        &self.audio
    }

    pub fn video(&self) -> &Arc<VideoRenderer> {
        &self.video
    }

    pub fn renderer_state(&self) -> RendererState {
        self.state.lock().renderer_state
    }

    pub fn is_buffering(&self) -> bool {
        self.state.lock().is_buffering
    }

    pub fn has_audio_stream(&self) -> bool {
        self.state.lock().has_audio_stream
    }

    pub fn set_has_audio_stream(&self, has_audio: bool) {
        self.state.lock().has_audio_stream = has_audio;
    }

    pub fn buffering_statistics(&self) -> BufferingStatistics {
        let state = self.state.lock();
        BufferingStatistics {
            buffering_count: state.buffering_count,
            total_buffering_time: state.total_buffering_time,
            playback_time: self.clock.now_seconds(),
        }
    }

    pub fn reset_buffering_statistics(&self) {
        let mut state = self.state.lock();
        state.buffering_count = 0;
        state.total_buffering_time = 0.0;
    }

    /// 解码已读到文件末尾：耗尽不再视为卡顿，缓冲中的等待立即结束
    pub fn set_decoding_ended(&self, ended: bool) {
        let was_ended = self.decoding_ended.swap(ended, Ordering::SeqCst);
        if ended && !was_ended {
            debug!("{} 📄 解码已结束，停止卡顿检测", log_ctx());
            self.check_buffering_status();
        }
    }

    pub fn is_decoding_ended(&self) -> bool {
        self.decoding_ended.load(Ordering::SeqCst)
    }

    // ========== 渲染控制 ==========

    /// 开始呈现；尚未准备好时忽略（就绪后由 did_prepare_for_rendering 通知）
    pub fn start_rendering(&self) {
        if self.renderer_state() == RendererState::Unprepared {
            debug!("渲染器尚未就绪，暂不开始呈现");
            return;
        }
        self.start_playback();
    }

    pub fn pause_rendering(&self) {
        self.pause_playback();
    }

    pub fn stop_rendering(&self) {
        if self.has_audio_stream() {
            self.audio.stop_player();
        }
        self.clock.set_rate(0.0);
        self.video.set_paused(true);
        self.set_renderer_state(RendererState::Stopped);
    }

    /// 丢弃两路渲染器中未完成的缓冲任务
    pub fn discard_pending(&self) {
        self.audio.discard_pending();
        self.video.discard_pending();
    }

    /// 回到未准备状态（换片时调用）
    pub fn reset(&self) {
        let changed = {
            let mut state = self.state.lock();
            state.buffering_timer.take();
            state.buffering_started = None;
            state.renderer_state = RendererState::Unprepared;
            std::mem::replace(&mut state.is_buffering, false)
        };
        self.decoding_ended.store(false, Ordering::SeqCst);
        self.video.reset();
        self.audio.reset();
        if changed {
            self.notify_buffering(false);
        }
    }

    fn start_playback(&self) {
        let (has_audio, rate) = {
            let state = self.state.lock();
            (state.has_audio_stream, state.rate)
        };
        if has_audio {
            self.audio.start_player();
        }
        self.clock.set_rate(rate);
        self.video.set_paused(false);
        self.set_renderer_state(RendererState::Rendering);
    }

    fn pause_playback(&self) {
        if self.has_audio_stream() {
            self.audio.pause_player();
        }
        self.clock.set_rate(0.0);
        self.video.set_paused(true);
        self.set_renderer_state(RendererState::Paused);
    }

    fn set_renderer_state(&self, new_state: RendererState) {
        let mut state = self.state.lock();
        if state.renderer_state != new_state {
            debug!("渲染器状态: {:?} → {:?}", state.renderer_state, new_state);
            state.renderer_state = new_state;
        }
    }

    pub fn set_playback_rate(&self, rate: f64) {
        let has_audio = {
            let mut state = self.state.lock();
            state.rate = rate;
            state.has_audio_stream
        };
        if has_audio {
            self.audio.set_rate(rate as f32);
        }
        if !self.clock.is_paused() {
            self.clock.set_rate(rate);
        }
    }

    pub fn set_video_frame_rate(&self, fps: f64) {
        self.video.set_preferred_frames_per_second(fps);
    }

    pub fn set_volume(&self, volume: f32) {
        self.audio.set_volume(volume);
    }

    // ========== 缓冲检测 ==========

    fn start_buffering(&self) {
        {
            let mut state = self.state.lock();
            if state.is_buffering {
                return;
            }
            state.is_buffering = true;
            state.buffering_count += 1;
            state.buffering_started = Some(Instant::now());
            let weak = self.weak_self.clone();
            state.buffering_timer = Some(Timer::repeating(self.check_interval, move || {
                if let Some(renderer) = weak.upgrade() {
                    renderer.check_buffering_status();
                }
            }));
            info!("{} ⏳ 开始缓冲（第 {} 次）", log_ctx(), state.buffering_count);
        }
        self.pause_playback();
        self.notify_buffering(true);
    }

    /// 结束缓冲并恢复呈现；返回本轮结束后的累计统计
    fn stop_buffering(&self) -> Option<BufferingStatistics> {
        let statistics = {
            let mut state = self.state.lock();
            if !state.is_buffering {
                return None;
            }
            state.is_buffering = false;
            state.buffering_timer.take();
            if let Some(started) = state.buffering_started.take() {
                let elapsed = started.elapsed().as_secs_f64();
                state.total_buffering_time += elapsed;
                info!(
                    "{} ✅ 缓冲结束，用时 {:.2}s（累计 {:.2}s）",
                    log_ctx(),
                    elapsed,
                    state.total_buffering_time
                );
            }
            BufferingStatistics {
                buffering_count: state.buffering_count,
                total_buffering_time: state.total_buffering_time,
                playback_time: self.clock.now_seconds(),
            }
        };
        self.notify_buffering(false);
        self.start_playback();
        Some(statistics)
    }

    fn notify_buffering(&self, is_buffering: bool) {
        if let Some(delegate) = self.delegate() {
            delegate.did_change_is_buffering(is_buffering);
        }
    }

    fn check_buffering_status(&self) {
        let has_audio = self.has_audio_stream();
        let audio_ready = !has_audio || self.audio.is_buffer_ready();
        self.handle_buffer_ready(self.video.is_buffer_ready(), audio_ready);
    }

    fn handle_buffer_ready(&self, video_ready: bool, audio_ready: bool) {
        let followup = if self.is_decoding_ended() {
            match self.stop_buffering() {
                Some(statistics) => Followup::BufferingStopped(statistics),
                None => self.prepare_if_unprepared(),
            }
        } else if !(video_ready && audio_ready) {
            Followup::None
        } else if self.is_buffering() {
            self.stop_buffering()
                .map_or(Followup::None, Followup::BufferingStopped)
        } else {
            let mut state = self.state.lock();
            if state.renderer_state == RendererState::Unprepared || state.renderer_state == RendererState::Stopped {
                state.renderer_state = RendererState::Rendering;
            }
            Followup::Prepared
        };

        let Some(delegate) = self.delegate() else {
            return;
        };
        match followup {
            Followup::None => {}
            Followup::Prepared => delegate.did_prepare_for_rendering(),
            Followup::BufferingStopped(statistics) => delegate.did_update_buffering_statistics(statistics),
        }
    }

    /// 解码结束但缓冲永远填不满时（片源很短），直接视为就绪
    fn prepare_if_unprepared(&self) -> Followup {
        let mut state = self.state.lock();
        if state.renderer_state == RendererState::Unprepared {
            state.renderer_state = RendererState::Rendering;
            Followup::Prepared
        } else {
            Followup::None
        }
    }

    fn handle_buffer_emptied(&self, medium: MediaFrameType) {
        if self.is_decoding_ended() {
            return;
        }
        {
            let state = self.state.lock();
            if matches!(state.renderer_state, RendererState::Unprepared | RendererState::Stopped) {
                return;
            }
            if medium == MediaFrameType::Audio && !state.has_audio_stream {
                return;
            }
        }
        match medium {
            MediaFrameType::Audio => {
                if !self.audio.needs_buffering() {
                    return;
                }
                self.start_buffering();
                self.audio.set_buffer_ready(false);
            }
            MediaFrameType::Video => {
                self.start_buffering();
                self.video.set_buffer_ready(false);
            }
        }
    }
}

impl RendererObserver for MediaRenderer {
    fn buffer_became_ready(&self, medium: MediaFrameType) {
        match medium {
            MediaFrameType::Video => {
                let audio_ready = !self.has_audio_stream() || self.audio.is_buffer_ready();
                self.handle_buffer_ready(true, audio_ready);
            }
            MediaFrameType::Audio => self.handle_buffer_ready(self.video.is_buffer_ready(), true),
        }
    }

    fn buffer_ran_dry(&self, medium: MediaFrameType) {
        self.handle_buffer_emptied(medium);
    }

    fn did_render(&self, medium: MediaFrameType, pts: MediaTime) {
        let from_timeline = match medium {
            MediaFrameType::Audio => self.has_audio_stream(),
            MediaFrameType::Video => !self.has_audio_stream(),
        };
        if !from_timeline {
            return;
        }
        if let Some(delegate) = self.delegate() {
            delegate.did_render_frame(pts);
        }
    }
}

impl BufferObserver for MediaRenderer {
    fn on_buffer_event(&self, role: BufferRole, event: BufferEvent) {
        if event != BufferEvent::Emptied {
            return;
        }
        match role {
            BufferRole::Textures => self.handle_buffer_emptied(MediaFrameType::Video),
            BufferRole::Pcm => self.handle_buffer_emptied(MediaFrameType::Audio),
            _ => {}
        }
    }
}
