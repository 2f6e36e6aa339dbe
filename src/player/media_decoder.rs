use crate::core::{
    log_ctx, DecodableFrame, MediaFrame, MediaFrameType, MediaTime, Packet, SeekKind, SeekReach, SeekStatus,
    StreamContext, TaskQueue,
};
use crate::player::decoder::{AudioDecoder, AudioOutputFormat, FrameDecoder, SurfaceAllocator, VideoDecoder};
use crate::player::demuxer_source::ReadResult;
use crate::player::media_source::MediaSource;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// 解码任务完成回调：(目标类型的帧, 另一类型的溢出帧)
pub type DecodeCompletion = Box<dyn FnOnce(Vec<MediaFrame>, Vec<MediaFrame>) + Send + 'static>;

/// 解码请求
pub struct DecodeTask {
    pub frame_type: MediaFrameType,
    pub count: usize,
    pub completion: Option<DecodeCompletion>,
}

impl DecodeTask {
    pub fn new<F>(frame_type: MediaFrameType, count: usize, completion: F) -> Self
    where
        F: FnOnce(Vec<MediaFrame>, Vec<MediaFrame>) + Send + 'static,
    {
        Self {
            frame_type,
            count,
            completion: Some(Box::new(completion)),
        }
    }
}

/// 解码编排器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    NoSource,
    Ready,
    Decoding,
    Stopped,
}

/// 解码编排器事件
pub trait DecoderObserver: Send + Sync {
    fn did_seek_start(&self, _kind: SeekKind) {}
    fn did_seek_end(&self, _kind: SeekKind) {}
    /// 读到文件末尾时报告最后一个视频帧位置
    fn did_find_end_of_file(&self, _position: MediaTime) {}
}

/// 解码编排器配置
#[derive(Debug, Clone, Copy)]
pub struct MediaDecoderConfig {
    pub hardware_acceleration: bool,
    pub audio_output: AudioOutputFormat,
    /// Default seek 的有效容差（秒）
    pub seek_tolerance: f64,
}

impl Default for MediaDecoderConfig {
    fn default() -> Self {
        Self {
            hardware_acceleration: true,
            audio_output: AudioOutputFormat::default(),
            seek_tolerance: 1.0,
        }
    }
}

enum DecoderEvent {
    SeekStart(SeekKind),
    SeekEnd(SeekKind),
    EndOfFile(MediaTime),
}

/// 单个包的处理结果
enum PacketStep {
    Frame(MediaFrame),
    Skipped,
    Exhausted,
}

struct DecoderInner {
    state: DecoderState,
    source: Option<Arc<MediaSource>>,
    video_stream: Option<StreamContext>,
    audio_stream: Option<StreamContext>,
    video_decoder: Option<VideoDecoder>,
    audio_decoder: Option<AudioDecoder>,
    seek_status: Option<SeekStatus>,
    last_video_pts: Option<MediaTime>,
    last_audio_pts: Option<MediaTime>,
    /// 当前任务：(类型, 剩余数量)
    current: Option<(MediaFrameType, usize)>,
}

impl DecoderInner {
    fn last_pts(&self, frame_type: MediaFrameType) -> Option<MediaTime> {
        match frame_type {
            MediaFrameType::Audio => self.last_audio_pts,
            MediaFrameType::Video => self.last_video_pts,
        }
    }

    fn set_last_pts(&mut self, frame_type: MediaFrameType, pts: MediaTime) {
        match frame_type {
            MediaFrameType::Audio => self.last_audio_pts = Some(pts),
            MediaFrameType::Video => self.last_video_pts = Some(pts),
        }
    }

    fn stream(&self, frame_type: MediaFrameType) -> Option<&StreamContext> {
        match frame_type {
            MediaFrameType::Audio => self.audio_stream.as_ref(),
            MediaFrameType::Video => self.video_stream.as_ref(),
        }
    }
}

/// 解码编排器 - 拉取数据包、按流分类、解码、seek 过滤，并满足排队的解码请求
///
/// 服务循环是单飞的：同一时刻只有一个线程在执行，其余入队方只负责入队。
pub struct MediaDecoder {
    config: MediaDecoderConfig,
    allocator: Arc<dyn SurfaceAllocator>,
    inner: Mutex<DecoderInner>,
    task_queue: TaskQueue<DecodeTask>,
    servicing: Mutex<()>,
    /// 交付锁：任务结果的有效性检查与完成回调在锁内进行
    delivery: Mutex<()>,
    is_enabled: AtomicBool,
    /// 每次 seek/切流/停止递增，服务循环据此丢弃之前收集的帧
    seek_generation: AtomicU64,
    observer: RwLock<Option<Weak<dyn DecoderObserver>>>,
}

impl MediaDecoder {
    pub fn new(config: MediaDecoderConfig, allocator: Arc<dyn SurfaceAllocator>) -> Self {
        Self {
            config,
            allocator,
            inner: Mutex::new(DecoderInner {
                state: DecoderState::NoSource,
                source: None,
                video_stream: None,
                audio_stream: None,
                video_decoder: None,
                audio_decoder: None,
                seek_status: None,
                last_video_pts: None,
                last_audio_pts: None,
                current: None,
            }),
            task_queue: TaskQueue::new(),
            servicing: Mutex::new(()),
            delivery: Mutex::new(()),
            is_enabled: AtomicBool::new(false),
            seek_generation: AtomicU64::new(0),
            observer: RwLock::new(None),
        }
    }

    pub fn set_observer(&self, observer: Weak<dyn DecoderObserver>) {
        *self.observer.write() = Some(observer);
    }

    pub fn state(&self) -> DecoderState {
        self.inner.lock().state
    }

    pub fn seek_status(&self) -> Option<SeekStatus> {
        self.inner.lock().seek_status
    }

    pub fn last_decoded_position(&self, frame_type: MediaFrameType) -> Option<MediaTime> {
        self.inner.lock().last_pts(frame_type)
    }

    pub fn media_source(&self) -> Option<Arc<MediaSource>> {
        self.inner.lock().source.clone()
    }

    /// 绑定媒体源并创建解码器，进入 Ready
    pub fn open_media_source(&self, source: Arc<MediaSource>) {
        let mut inner = self.inner.lock();
        let video_stream = source.video_stream();
        let audio_stream = source.audio_stream();

        inner.video_decoder = video_stream.as_ref().map(|stream| {
            self.prepare_video_codec(stream);
            VideoDecoder::new(stream, self.allocator.clone())
        });
        inner.audio_decoder = audio_stream
            .as_ref()
            .map(|stream| AudioDecoder::new(stream, self.config.audio_output));
        inner.video_stream = video_stream;
        inner.audio_stream = audio_stream;
        inner.source = Some(source);
        inner.seek_status = None;
        inner.last_video_pts = None;
        inner.last_audio_pts = None;
        inner.state = DecoderState::Ready;
        self.seek_generation.fetch_add(1, Ordering::SeqCst);
        info!(
            "{} 🎬 解码器已绑定媒体源（视频: {}, 音频: {}）",
            log_ctx(),
            inner.video_decoder.is_some(),
            inner.audio_decoder.is_some()
        );
    }

    fn prepare_video_codec(&self, stream: &StreamContext) {
        if self.config.hardware_acceleration {
            let enabled = stream.codec.lock().enable_hardware_acceleration();
            debug!("视频硬件加速: {}", if enabled { "已启用" } else { "不可用" });
        }
    }

    /// 解除媒体源，清空任务，回到 NoSource
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.source = None;
        inner.video_stream = None;
        inner.audio_stream = None;
        inner.video_decoder = None;
        inner.audio_decoder = None;
        inner.seek_status = None;
        inner.last_video_pts = None;
        inner.last_audio_pts = None;
        inner.state = DecoderState::NoSource;
        self.task_queue.reset();
        self.seek_generation.fetch_add(1, Ordering::SeqCst);
        info!("{} 🔄 解码器已重置", log_ctx());
    }

    /// 已排队 + 进行中任务还会产出的该类型帧数
    pub fn enqueued_frames_count(&self, frame_type: MediaFrameType) -> usize {
        let queued = self
            .task_queue
            .sum_by(|task| if task.frame_type == frame_type { task.count } else { 0 });
        let current = match self.inner.lock().current {
            Some((t, remaining)) if t == frame_type => remaining,
            _ => 0,
        };
        queued + current
    }

    pub fn enqueue_decode_task(&self, task: DecodeTask) {
        trace!("解码任务入队: {:?} x{}", task.frame_type, task.count);
        self.task_queue.enqueue(task);
        if self.state() == DecoderState::Ready {
            self.start_decoding();
        }
    }

    /// 服务任务队列；已有线程在服务时立即返回
    pub fn start_decoding(&self) {
        loop {
            let Some(guard) = self.servicing.try_lock() else {
                return;
            };
            {
                // 与 stop_decoding 在同一把锁下修改状态和开关
                let mut inner = self.inner.lock();
                if inner.state != DecoderState::Ready {
                    return;
                }
                inner.state = DecoderState::Decoding;
                self.is_enabled.store(true, Ordering::SeqCst);
            }

            while self.is_enabled.load(Ordering::SeqCst) {
                let Some(task) = self.task_queue.dequeue() else {
                    break;
                };
                self.run_task(task);
            }

            {
                let mut inner = self.inner.lock();
                inner.current = None;
                if inner.state == DecoderState::Decoding {
                    inner.state = DecoderState::Ready;
                }
            }
            drop(guard);

            // 释放后再检查一次，避免与并发入队错过
            if self.task_queue.is_empty() || self.state() != DecoderState::Ready {
                return;
            }
        }
    }

    /// 协作式停止：进行中的任务在下一个包之前结束，已收集的帧作废
    pub fn stop_decoding(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = DecoderState::Stopped;
            self.is_enabled.store(false, Ordering::SeqCst);
            self.seek_generation.fetch_add(1, Ordering::SeqCst);
        }
        info!("{} ⏹ 解码已停止", log_ctx());
    }

    /// 在交付锁内执行 `f`：期间没有任务结果会被交付
    ///
    /// `f` 里的 seek/停止使进行中的任务作废，锁释放后它们交付的是空结果；
    /// 因此在 `f` 里清空下游缓冲区后不会再混入旧位置的帧。
    /// 不能在完成回调里调用（交付锁不可重入）。
    pub fn hold_delivery<R>(&self, f: impl FnOnce() -> R) -> R {
        let _gate = self.delivery.lock();
        f()
    }

    fn run_task(&self, mut task: DecodeTask) {
        let mut wanted = Vec::with_capacity(task.count);
        let mut spillover = Vec::new();
        let mut generation = self.seek_generation.load(Ordering::SeqCst);
        self.inner.lock().current = Some((task.frame_type, task.count));

        while wanted.len() < task.count {
            if !self.is_enabled.load(Ordering::SeqCst) {
                debug!("解码已停止，提前结束任务");
                break;
            }
            let (step, step_generation, events) = self.decode_next_packet();
            self.dispatch_events(events);

            if step_generation != generation {
                // seek 发生在任务中途：之前收集的帧属于旧位置
                debug!("任务中途发生 seek，丢弃 {} + {} 帧", wanted.len(), spillover.len());
                wanted.clear();
                spillover.clear();
                generation = step_generation;
                self.inner.lock().current = Some((task.frame_type, task.count));
            }

            match step {
                PacketStep::Frame(frame) => {
                    if frame.frame_type == task.frame_type {
                        wanted.push(frame);
                        self.inner.lock().current = Some((task.frame_type, task.count - wanted.len()));
                    } else {
                        spillover.push(frame);
                    }
                }
                PacketStep::Skipped => {}
                PacketStep::Exhausted => break,
            }
        }

        self.inner.lock().current = None;
        let _gate = self.delivery.lock();
        if self.seek_generation.load(Ordering::SeqCst) != generation {
            debug!("任务结果已作废（{} + {} 帧）", wanted.len(), spillover.len());
            wanted.clear();
            spillover.clear();
        }
        trace!(
            "解码任务完成: {:?} {}/{}（溢出 {}）",
            task.frame_type,
            wanted.len(),
            task.count,
            spillover.len()
        );
        if let Some(completion) = task.completion.take() {
            completion(wanted, spillover);
        }
    }

    /// 读取并处理一个包
    fn decode_next_packet(&self) -> (PacketStep, u64, Vec<DecoderEvent>) {
        let mut guard = self.inner.lock();
        let generation = self.seek_generation.load(Ordering::SeqCst);
        let (step, events) = self.process_packet(&mut guard);
        (step, generation, events)
    }

    fn process_packet(&self, inner: &mut DecoderInner) -> (PacketStep, Vec<DecoderEvent>) {
        let mut events = Vec::new();
        let Some(source) = inner.source.clone() else {
            return (PacketStep::Exhausted, events);
        };

        let packet = match source.read_packet() {
            ReadResult::Packet(packet) => packet,
            ReadResult::EndOfFile => {
                if let Some(position) = inner.last_video_pts {
                    debug!("{} 📄 读到文件末尾，最后视频位置 {}", log_ctx(), position);
                    events.push(DecoderEvent::EndOfFile(position));
                }
                return (PacketStep::Exhausted, events);
            }
            ReadResult::Error(e) => {
                warn!("{} ⚠ 读包失败: {}", log_ctx(), e);
                return (PacketStep::Exhausted, events);
            }
        };

        let frame_type = if inner.audio_stream.as_ref().map(|s| s.index) == Some(packet.stream_index) {
            MediaFrameType::Audio
        } else if inner.video_stream.as_ref().map(|s| s.index) == Some(packet.stream_index) {
            MediaFrameType::Video
        } else {
            return (PacketStep::Skipped, events);
        };
        let Some(stream) = inner.stream(frame_type) else {
            return (PacketStep::Skipped, events);
        };
        let decodable = create_decodable_frame(frame_type, packet, stream);

        let decoded = match frame_type {
            MediaFrameType::Video => inner.video_decoder.as_mut().and_then(|d| d.decode(&decodable)),
            MediaFrameType::Audio => inner.audio_decoder.as_mut().and_then(|d| d.decode(&decodable)),
        };
        let Some(frame) = decoded else {
            return (PacketStep::Skipped, events);
        };

        let last_pts = inner.last_pts(frame_type);
        if let Some(status) = inner.seek_status.as_mut() {
            if status.reach(frame_type) == SeekReach::NotReached {
                let valid = match status.kind {
                    SeekKind::Default => {
                        status.target.sub(frame.position()).abs().seconds() <= self.config.seek_tolerance
                    }
                    SeekKind::StreamSwitch => last_pts.map_or(true, |last| frame.position() >= last),
                };
                if !valid {
                    trace!("丢弃 seek 之前的{}帧 {}", frame_type.as_str(), frame.position());
                    return (PacketStep::Skipped, events);
                }
                status.mark_reached(frame_type);
                debug!("{}到达 seek 位置 {}", frame_type.as_str(), frame.position());
            }
            if status.is_complete() {
                let kind = status.kind;
                inner.seek_status = None;
                info!("{} ✅ seek 完成（{:?}）", log_ctx(), kind);
                events.push(DecoderEvent::SeekEnd(kind));
            }
        }

        inner.set_last_pts(frame_type, frame.position());
        (PacketStep::Frame(frame), events)
    }

    /// 按秒 seek（优先视频流，自动加上流起始时间）；没有可 seek 的流时返回 false
    pub fn seek_to(&self, seconds: f64, kind: SeekKind) -> bool {
        let started = {
            let mut inner = self.inner.lock();
            let Some(stream) = inner.video_stream.clone().or_else(|| inner.audio_stream.clone()) else {
                warn!("{} ⚠ 没有可 seek 的流", log_ctx());
                return false;
            };
            let corrected = seconds + stream.start_time.seconds();
            let target = MediaTime::from_seconds(corrected, stream.timebase.denominator);
            self.seek_locked(&mut inner, target, &stream, kind)
        };
        if started {
            self.dispatch_events(vec![DecoderEvent::SeekStart(kind)]);
        }
        started
    }

    /// 按时间戳在指定流上 seek
    pub fn seek_to_pts(&self, pts: MediaTime, stream: &StreamContext, kind: SeekKind) {
        let mut inner = self.inner.lock();
        self.seek_locked(&mut inner, pts, stream, kind);
    }

    fn seek_locked(&self, inner: &mut DecoderInner, target: MediaTime, stream: &StreamContext, kind: SeekKind) -> bool {
        inner.seek_status = None;
        let Some(source) = inner.source.clone() else {
            return false;
        };
        let timestamp = stream.stream_ts_from_time(target);
        info!(
            "{} ⏩ seek {:?} → {}（流 #{} ts={}）",
            log_ctx(),
            kind,
            target,
            stream.index,
            timestamp
        );
        if !source.seek(stream.index, timestamp, true) {
            warn!("{} ⚠ 解封装 seek 失败，继续从当前位置解码", log_ctx());
        }
        for s in [&inner.video_stream, &inner.audio_stream].into_iter().flatten() {
            s.codec.lock().flush_buffers();
        }

        let mut status = SeekStatus::new(kind, target);
        // 不存在的媒体视为已到达
        if inner.video_stream.is_none() {
            status.mark_reached(MediaFrameType::Video);
        }
        if inner.audio_stream.is_none() {
            status.mark_reached(MediaFrameType::Audio);
        }
        inner.seek_status = Some(status);
        self.seek_generation.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// 切换到新媒体源：重新绑定解码器，再 StreamSwitch seek 到切换前的最后位置
    pub fn switch_stream(&self, new_source: Arc<MediaSource>) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let video_stream = new_source.video_stream();
        let audio_stream = new_source.audio_stream();

        match &video_stream {
            Some(stream) => {
                self.prepare_video_codec(stream);
                match inner.video_decoder {
                    Some(ref mut decoder) => decoder.setup(stream),
                    None => inner.video_decoder = Some(VideoDecoder::new(stream, self.allocator.clone())),
                }
            }
            None => inner.video_decoder = None,
        }
        match &audio_stream {
            Some(stream) => match inner.audio_decoder {
                Some(ref mut decoder) => decoder.setup(stream),
                None => inner.audio_decoder = Some(AudioDecoder::new(stream, self.config.audio_output)),
            },
            None => inner.audio_decoder = None,
        }

        inner.video_stream = video_stream.clone();
        inner.audio_stream = audio_stream.clone();
        inner.source = Some(new_source);
        info!("{} 🔀 解码器已切换到新媒体源", log_ctx());

        let resume = match (inner.last_audio_pts, &audio_stream, inner.last_video_pts, &video_stream) {
            (Some(pts), Some(stream), _, _) => Some((pts, stream.clone())),
            (_, _, Some(pts), Some(stream)) => Some((pts, stream.clone())),
            _ => None,
        };
        match resume {
            Some((pts, stream)) => {
                self.seek_locked(inner, pts, &stream, SeekKind::StreamSwitch);
            }
            None => {
                inner.seek_status = None;
                self.seek_generation.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn dispatch_events(&self, events: Vec<DecoderEvent>) {
        if events.is_empty() {
            return;
        }
        let observer = self.observer.read().as_ref().and_then(|o| o.upgrade());
        let Some(observer) = observer else {
            return;
        };
        for event in events {
            match event {
                DecoderEvent::SeekStart(kind) => observer.did_seek_start(kind),
                DecoderEvent::SeekEnd(kind) => observer.did_seek_end(kind),
                DecoderEvent::EndOfFile(position) => observer.did_find_end_of_file(position),
            }
        }
    }
}

/// 包 → 待解码帧（时间换算到流时间基；包时长为 0 时取 1/fps）
fn create_decodable_frame(frame_type: MediaFrameType, packet: Packet, stream: &StreamContext) -> DecodableFrame {
    let pts = stream.time_from_stream_ts(packet.pts);
    let dts = stream.time_from_stream_ts(packet.dts);
    let duration = if packet.duration != 0 {
        stream.time_from_stream_ts(packet.duration)
    } else if stream.fps.is_valid() {
        MediaTime::new(stream.fps.denominator as i64, stream.fps.numerator)
    } else {
        MediaTime::ZERO
    };
    DecodableFrame {
        frame_type,
        packet,
        pts,
        dts,
        duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::decoder::HeapSurfaceAllocator;
    use crate::player::testing::{FakeOpener, FakeSource};
    use std::sync::mpsc;

    #[derive(Default)]
    struct Events {
        seek_starts: Mutex<Vec<SeekKind>>,
        seek_ends: Mutex<Vec<SeekKind>>,
        eof: Mutex<Vec<MediaTime>>,
    }

    impl DecoderObserver for Events {
        fn did_seek_start(&self, kind: SeekKind) {
            self.seek_starts.lock().push(kind);
        }
        fn did_seek_end(&self, kind: SeekKind) {
            self.seek_ends.lock().push(kind);
        }
        fn did_find_end_of_file(&self, position: MediaTime) {
            self.eof.lock().push(position);
        }
    }

    fn decoder_for(source: FakeSource) -> (MediaDecoder, Arc<Events>, Arc<FakeOpener>) {
        let opener = FakeOpener::single("movie", source);
        let media = MediaSource::open("movie", opener.clone()).unwrap();
        let decoder = MediaDecoder::new(MediaDecoderConfig::default(), Arc::new(HeapSurfaceAllocator::default()));
        decoder.open_media_source(Arc::new(media));
        let events = Arc::new(Events::default());
        decoder.set_observer(Arc::downgrade(&events) as Weak<dyn DecoderObserver>);
        (decoder, events, opener)
    }

    fn decode(decoder: &MediaDecoder, frame_type: MediaFrameType, count: usize) -> (Vec<MediaFrame>, Vec<MediaFrame>) {
        let (tx, rx) = mpsc::channel();
        decoder.enqueue_decode_task(DecodeTask::new(frame_type, count, move |wanted, spill| {
            let _ = tx.send((wanted, spill));
        }));
        rx.recv().unwrap()
    }

    fn positions(frames: &[MediaFrame]) -> Vec<f64> {
        frames.iter().map(|f| f.position().seconds()).collect()
    }

    #[test]
    fn task_delivers_exact_count_and_spillover() {
        let (decoder, _events, _) = decoder_for(FakeSource::movie(4.0));
        let (video, spill) = decode(&decoder, MediaFrameType::Video, 10);
        assert_eq!(video.len(), 10);
        assert!(video.iter().all(|f| f.frame_type == MediaFrameType::Video));
        assert!(!spill.is_empty());
        assert!(spill.iter().all(|f| f.frame_type == MediaFrameType::Audio));
        // 同一媒体内位置单调不减
        let p = positions(&video);
        assert!(p.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(decoder.state(), DecoderState::Ready);
        assert_eq!(decoder.enqueued_frames_count(MediaFrameType::Video), 0);
    }

    #[test]
    fn end_of_file_reports_last_video_position() {
        let (decoder, events, _) = decoder_for(FakeSource::movie(1.0));
        let (video, _) = decode(&decoder, MediaFrameType::Video, 1000);
        assert_eq!(video.len(), 30);
        let eof = events.eof.lock().clone();
        assert_eq!(eof.len(), 1);
        assert_eq!(eof[0], video.last().unwrap().position());
    }

    #[test]
    fn end_of_file_without_video_is_silent() {
        let source = FakeSource::new()
            .with_audio(0, crate::core::Rational::new(1, 44100), 44100)
            .with_packets(0, 10, 1024, 1);
        let (decoder, events, _) = decoder_for(source);
        let (audio, _) = decode(&decoder, MediaFrameType::Audio, 50);
        assert_eq!(audio.len(), 10);
        assert!(events.eof.lock().is_empty());
    }

    #[test]
    fn default_seek_filters_frames_until_within_tolerance() {
        let (decoder, events, _) = decoder_for(FakeSource::movie(10.0).with_keyframe_interval(90));
        decode(&decoder, MediaFrameType::Video, 5);

        // 关键帧间隔 3 秒：seek 到 5.5 秒落在 3 秒的关键帧
        decoder.seek_to(5.5, SeekKind::Default);
        assert_eq!(*events.seek_starts.lock(), vec![SeekKind::Default]);
        assert!(decoder.seek_status().is_some());

        let (video, spill) = decode(&decoder, MediaFrameType::Video, 20);
        assert!(positions(&video).iter().all(|p| *p >= 4.5), "{:?}", positions(&video));
        assert!(positions(&spill).iter().all(|p| *p >= 4.5));
        assert_eq!(*events.seek_ends.lock(), vec![SeekKind::Default]);
        assert!(decoder.seek_status().is_none());
    }

    #[test]
    fn new_seek_replaces_previous_status() {
        let (decoder, events, _) = decoder_for(FakeSource::movie(10.0));
        decoder.seek_to(2.0, SeekKind::Default);
        decoder.seek_to(7.0, SeekKind::Default);
        assert_eq!(decoder.seek_status().unwrap().target.seconds(), 7.0);
        let (video, _) = decode(&decoder, MediaFrameType::Video, 5);
        assert!(video[0].position().seconds() >= 6.0);
        assert_eq!(events.seek_ends.lock().len(), 1);
    }

    #[test]
    fn seek_without_audio_completes_on_video_alone() {
        let source = FakeSource::new()
            .with_video(0, crate::core::Rational::new(1, 90000), 900_000)
            .with_packets(0, 300, 3000, 30);
        let (decoder, events, _) = decoder_for(source);
        decoder.seek_to(4.0, SeekKind::Default);
        let (video, _) = decode(&decoder, MediaFrameType::Video, 3);
        assert_eq!(video.len(), 3);
        assert_eq!(*events.seek_ends.lock(), vec![SeekKind::Default]);
    }

    #[test]
    fn stream_switch_resumes_at_last_decoded_positions() {
        let (decoder, events, opener) = decoder_for(FakeSource::movie(10.0));
        let (video, audio) = decode(&decoder, MediaFrameType::Video, 60);
        let last_video = video.last().unwrap().position();
        let last_audio = audio.last().unwrap().position();

        opener.insert("movie-hd", FakeSource::movie(10.0).with_keyframe_interval(60));
        let hd = Arc::new(MediaSource::open("movie-hd", opener.clone()).unwrap());
        decoder.switch_stream(hd);
        assert_eq!(decoder.seek_status().unwrap().kind, SeekKind::StreamSwitch);

        let (video, audio) = decode(&decoder, MediaFrameType::Video, 10);
        assert!(video[0].position() >= last_video);
        assert!(audio[0].position() >= last_audio);
        assert_eq!(*events.seek_ends.lock(), vec![SeekKind::StreamSwitch]);
        // 切流不触发 seek 开始事件
        assert!(events.seek_starts.lock().is_empty());
    }

    #[test]
    fn stop_decoding_is_terminal_until_reopened() {
        let (decoder, _events, opener) = decoder_for(FakeSource::movie(2.0));
        decoder.stop_decoding();
        assert_eq!(decoder.state(), DecoderState::Stopped);

        decoder.enqueue_decode_task(DecodeTask::new(MediaFrameType::Video, 4, |_, _| {}));
        assert_eq!(decoder.enqueued_frames_count(MediaFrameType::Video), 4);
        assert_eq!(decoder.enqueued_frames_count(MediaFrameType::Audio), 0);

        let media = MediaSource::open("movie", opener).unwrap();
        decoder.open_media_source(Arc::new(media));
        decoder.start_decoding();
        assert_eq!(decoder.enqueued_frames_count(MediaFrameType::Video), 0);
        assert_eq!(decoder.state(), DecoderState::Ready);
    }

    #[test]
    fn stop_from_a_completion_halts_the_service_loop() {
        let (decoder, _events, opener) = decoder_for(FakeSource::movie(4.0));
        let decoder = Arc::new(decoder);
        decoder.stop_decoding();
        let completed = Arc::new(Mutex::new(0));
        for _ in 0..2 {
            let weak = Arc::downgrade(&decoder);
            let completed = completed.clone();
            decoder.enqueue_decode_task(DecodeTask::new(MediaFrameType::Video, 2, move |_, _| {
                *completed.lock() += 1;
                if let Some(decoder) = weak.upgrade() {
                    decoder.stop_decoding();
                }
            }));
        }

        decoder.open_media_source(Arc::new(MediaSource::open("movie", opener).unwrap()));
        decoder.start_decoding();
        assert_eq!(*completed.lock(), 1);
        assert_eq!(decoder.state(), DecoderState::Stopped);
        assert_eq!(decoder.enqueued_frames_count(MediaFrameType::Video), 2);
    }

    #[test]
    fn concurrent_stop_wins_over_start() {
        let (decoder, _events, opener) = decoder_for(FakeSource::movie(60.0));
        let decoder = Arc::new(decoder);
        let completed = Arc::new(Mutex::new(0usize));

        for round in 0..20 {
            decoder.stop_decoding();
            for _ in 0..30 {
                let completed = completed.clone();
                decoder.enqueue_decode_task(DecodeTask::new(MediaFrameType::Video, 1, move |_, _| {
                    *completed.lock() += 1;
                }));
            }
            decoder.open_media_source(Arc::new(MediaSource::open("movie", opener.clone()).unwrap()));

            let worker = {
                let decoder = decoder.clone();
                std::thread::spawn(move || decoder.start_decoding())
            };
            decoder.stop_decoding();
            let at_stop = *completed.lock();
            worker.join().unwrap();

            // 停止返回后最多只有一个进行中的任务还能完成
            assert!(*completed.lock() - at_stop <= 1, "round {round}");
            assert_eq!(decoder.state(), DecoderState::Stopped, "round {round}");
            decoder.reset();
        }
    }

    #[test]
    fn stop_discards_frames_collected_by_the_running_task() {
        let source = FakeSource::movie(10.0).with_read_delay(std::time::Duration::from_millis(2));
        let (decoder, _events, _) = decoder_for(source);
        let decoder = Arc::new(decoder);
        let (tx, rx) = mpsc::channel();
        let worker = {
            let decoder = decoder.clone();
            std::thread::spawn(move || {
                decoder.enqueue_decode_task(DecodeTask::new(MediaFrameType::Video, 200, move |wanted, spill| {
                    let _ = tx.send((wanted.len(), spill.len()));
                }));
            })
        };
        assert!(crate::player::testing::wait_until(std::time::Duration::from_secs(5), || {
            decoder.enqueued_frames_count(MediaFrameType::Video) < 190
        }));

        decoder.stop_decoding();
        worker.join().unwrap();
        assert_eq!(rx.recv().unwrap(), (0, 0));
        assert_eq!(decoder.state(), DecoderState::Stopped);
    }

    #[test]
    fn seek_inside_held_delivery_keeps_stale_frames_out() {
        let source = FakeSource::movie(10.0).with_read_delay(std::time::Duration::from_millis(1));
        let (decoder, _events, _) = decoder_for(source);
        let decoder = Arc::new(decoder);
        let (tx, rx) = mpsc::channel();
        let worker = {
            let decoder = decoder.clone();
            std::thread::spawn(move || {
                decoder.enqueue_decode_task(DecodeTask::new(MediaFrameType::Video, 60, move |wanted, spill| {
                    let _ = tx.send((wanted, spill));
                }));
            })
        };
        assert!(crate::player::testing::wait_until(std::time::Duration::from_secs(5), || {
            decoder.enqueued_frames_count(MediaFrameType::Video) < 55
        }));

        assert!(decoder.hold_delivery(|| decoder.seek_to(6.0, SeekKind::Default)));
        worker.join().unwrap();
        let (video, audio) = rx.recv().unwrap();
        // 任务在 seek 后继续收集：交付的只有新位置附近的帧
        assert!(positions(&video).iter().all(|p| *p >= 5.0), "{:?}", positions(&video));
        assert!(positions(&audio).iter().all(|p| *p >= 5.0));
    }

    #[test]
    fn reset_drops_source_and_pending_tasks() {
        let (decoder, _events, _) = decoder_for(FakeSource::movie(2.0));
        decoder.stop_decoding();
        decoder.enqueue_decode_task(DecodeTask::new(MediaFrameType::Audio, 7, |_, _| {}));
        decoder.reset();
        assert_eq!(decoder.state(), DecoderState::NoSource);
        assert_eq!(decoder.enqueued_frames_count(MediaFrameType::Audio), 0);
        assert!(decoder.media_source().is_none());
    }

    #[test]
    fn corrupt_packets_are_skipped() {
        let (decoder, _events, _) = decoder_for(FakeSource::movie(2.0).with_corrupt_video_packet(3));
        let (video, _) = decode(&decoder, MediaFrameType::Video, 10);
        assert_eq!(video.len(), 10);
        let p = positions(&video);
        assert!(!p.iter().any(|x| (*x - 0.1).abs() < 1e-9));
    }

    #[test]
    fn decodable_frame_duration_falls_back_to_fps() {
        let source = FakeSource::movie(1.0);
        let opener = FakeOpener::single("m", source);
        let media = MediaSource::open("m", opener).unwrap();
        let stream = media.video_stream().unwrap();
        let packet = Packet {
            stream_index: stream.index,
            pts: 9000,
            dts: 9000,
            duration: 0,
            is_keyframe: false,
            data: vec![],
        };
        let frame = create_decodable_frame(MediaFrameType::Video, packet.clone(), &stream);
        assert_eq!(frame.pts, MediaTime::new(1, 10));
        assert_eq!(frame.duration, MediaTime::new(1, 30));

        let frame = create_decodable_frame(MediaFrameType::Video, Packet { duration: 1500, ..packet }, &stream);
        assert_eq!(frame.duration, MediaTime::new(1, 60));
    }
}
