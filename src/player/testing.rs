//! 测试用的脚本化协作者：解封装器、编解码器、音频引擎、呈现端

use crate::core::{CodecHandle, MediaTime, Packet, Rational, SourceOpenError, StreamContext, StreamKind};
use crate::player::decoder::AudioOutputFormat;
use crate::player::demuxer_source::{
    AudioResampler, Codec, Demuxer, RawAudioFrame, RawFrame, RawPixelFormat, RawVideoFrame, ReadResult, Received, SampleFormat,
    SourceOpener, StreamInfo,
};
use crate::core::{MediaFrameType, Result as PlayerResult, Variant};
use crate::player::item::VariantResolver;
use crate::renderer::{AudioBuffer, AudioEngine, PlayedCallback, VideoSink, VideoTexture};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============= 原始帧构造 =============

pub fn raw_audio_i16(sample_rate: u32, channels: u16, interleaved: &[i16]) -> RawAudioFrame {
    RawAudioFrame {
        pts: None,
        sample_rate,
        channels,
        format: SampleFormat::I16,
        planar: false,
        samples: interleaved.len() / channels.max(1) as usize,
        planes: vec![bytemuck::cast_slice(interleaved).to_vec()],
    }
}

pub fn raw_yuv420p(width: u32, height: u32, y_stride: usize, c_stride: usize, y: u8, u: u8, v: u8) -> RawVideoFrame {
    let chroma_rows = (height as usize).div_ceil(2);
    RawVideoFrame {
        pts: None,
        width,
        height,
        format: RawPixelFormat::Yuv420p,
        planes: vec![
            vec![y; y_stride * height as usize],
            vec![u; c_stride * chroma_rows],
            vec![v; c_stride * chroma_rows],
        ],
        line_sizes: vec![y_stride, c_stride, c_stride],
        hardware_surface: None,
    }
}

// ============= 重采样 =============

/// 只接受已是输出格式的帧（S16 交错、同采样率同声道），原样拷贝
pub struct PassthroughResampler {
    target: AudioOutputFormat,
}

impl PassthroughResampler {
    pub fn new(target: AudioOutputFormat) -> Self {
        Self { target }
    }
}

impl AudioResampler for PassthroughResampler {
    fn convert(&mut self, frame: &RawAudioFrame, out: &mut Vec<i16>) -> Option<usize> {
        if frame.format != SampleFormat::I16
            || frame.planar
            || frame.sample_rate != self.target.sample_rate
            || frame.channels != self.target.channels
        {
            return None;
        }
        let bytes = frame.samples * frame.channels as usize * 2;
        let plane = frame.planes.first().filter(|p| p.len() >= bytes)?;
        out.extend(plane[..bytes].chunks_exact(2).map(bytemuck::pod_read_unaligned::<i16>));
        Some(frame.samples)
    }
}

// ============= 编解码器 =============

/// 按脚本依次返回接收结果
pub struct ScriptedCodec {
    script: VecDeque<Received>,
    provides_resampler: bool,
}

impl ScriptedCodec {
    pub fn new(script: Vec<Received>) -> Self {
        Self {
            script: script.into(),
            provides_resampler: true,
        }
    }

    pub fn without_resampler(mut self) -> Self {
        self.provides_resampler = false;
        self
    }
}

impl Codec for ScriptedCodec {
    fn send_packet(&mut self, _packet: &Packet) -> Result<(), String> {
        Ok(())
    }

    fn receive_frame(&mut self) -> Received {
        self.script.pop_front().unwrap_or(Received::NotReady)
    }

    fn flush_buffers(&mut self) {}

    fn create_resampler(&self, target: AudioOutputFormat) -> Option<Box<dyn AudioResampler>> {
        self.provides_resampler
            .then(|| Box::new(PassthroughResampler::new(target)) as Box<dyn AudioResampler>)
    }
}

pub fn audio_stream_context(codec: ScriptedCodec) -> StreamContext {
    StreamContext {
        index: 1,
        fps: Rational::default(),
        timebase: Rational::new(1, 44100),
        duration: MediaTime::new(10, 1),
        start_time: MediaTime::ZERO,
        codec: CodecHandle::new(Box::new(codec)),
        kind: StreamKind::Audio {
            sample_rate: 44100,
            channel_count: 1,
        },
    }
}

pub fn video_stream_context(codec: ScriptedCodec) -> StreamContext {
    StreamContext {
        index: 0,
        fps: Rational::new(30, 1),
        timebase: Rational::new(1, 90000),
        duration: MediaTime::new(10, 1),
        start_time: MediaTime::ZERO,
        codec: CodecHandle::new(Box::new(codec)),
        kind: StreamKind::Video,
    }
}

/// 记录解封装/解码器调用
#[derive(Debug, Default)]
pub struct DemuxLog {
    pub seeks: Vec<(usize, i64)>,
    pub flushes: usize,
    pub hardware_enabled: usize,
}

/// 每个包产出一帧（pts 取自包），数据为 "bad" 的包送入失败
struct PacketEchoCodec {
    medium: MediaFrameType,
    pending: VecDeque<RawFrame>,
    log: Arc<Mutex<DemuxLog>>,
}

impl Codec for PacketEchoCodec {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), String> {
        if packet.data == b"bad" {
            return Err("corrupt packet".into());
        }
        let frame = match self.medium {
            MediaFrameType::Video => {
                let mut raw = raw_yuv420p(4, 2, 4, 2, 16, 128, 128);
                raw.pts = Some(packet.pts);
                RawFrame::Video(raw)
            }
            MediaFrameType::Audio => {
                let mut raw = raw_audio_i16(44100, 1, &[0i16; 1024]);
                raw.pts = Some(packet.pts);
                RawFrame::Audio(raw)
            }
        };
        self.pending.push_back(frame);
        Ok(())
    }

    fn receive_frame(&mut self) -> Received {
        match self.pending.pop_front() {
            Some(frame) => Received::Frame(frame),
            None => Received::NotReady,
        }
    }

    fn enable_hardware_acceleration(&mut self) -> bool {
        self.log.lock().hardware_enabled += 1;
        true
    }

    fn flush_buffers(&mut self) {
        self.pending.clear();
        self.log.lock().flushes += 1;
    }

    fn create_resampler(&self, target: AudioOutputFormat) -> Option<Box<dyn AudioResampler>> {
        (self.medium == MediaFrameType::Audio).then(|| Box::new(PassthroughResampler::new(target)) as Box<dyn AudioResampler>)
    }
}

// ============= 解封装器 =============

/// 脚本化媒体源（可克隆，每次打开得到一个新游标）
#[derive(Clone)]
pub struct FakeSource {
    streams: Vec<StreamInfo>,
    unopenable: HashSet<usize>,
    fail_stream_info: bool,
    packets: Vec<Packet>,
    /// 每次读包前的等待，模拟网络/解码耗时
    read_delay: Option<Duration>,
    log: Arc<Mutex<DemuxLog>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            unopenable: HashSet::new(),
            fail_stream_info: false,
            packets: Vec::new(),
            read_delay: None,
            log: Arc::new(Mutex::new(DemuxLog::default())),
        }
    }

    /// 视频 #0（30fps，1/90000）+ 音频 #1（1/44100，每包 1024 采样），每秒一个关键帧
    pub fn movie(seconds: f64) -> Self {
        let video_packets = (seconds * 30.0).round() as usize;
        let audio_packets = (seconds * 44100.0 / 1024.0).ceil() as usize;
        Self::new()
            .with_video(0, Rational::new(1, 90000), (seconds * 90000.0) as i64)
            .with_audio(1, Rational::new(1, 44100), (seconds * 44100.0) as i64)
            .with_packets(0, video_packets, 3000, 30)
            .with_packets(1, audio_packets, 1024, 1)
    }

    pub fn log(&self) -> Arc<Mutex<DemuxLog>> {
        self.log.clone()
    }

    fn stream_info(index: usize, medium: Option<MediaFrameType>, timebase: Rational, duration: i64) -> StreamInfo {
        StreamInfo {
            index,
            medium,
            is_attached_picture: false,
            fps: Rational::new(30, 1),
            timebase,
            duration,
            start_time: 0,
            sample_rate: 44100,
            channels: 2,
        }
    }

    pub fn with_video(mut self, index: usize, timebase: Rational, duration: i64) -> Self {
        self.streams
            .push(Self::stream_info(index, Some(MediaFrameType::Video), timebase, duration));
        self
    }

    pub fn with_audio(mut self, index: usize, timebase: Rational, duration: i64) -> Self {
        let mut info = Self::stream_info(index, Some(MediaFrameType::Audio), timebase, duration);
        info.fps = Rational::default();
        self.streams.push(info);
        self
    }

    pub fn with_attached_picture(mut self, index: usize) -> Self {
        let mut info = Self::stream_info(index, Some(MediaFrameType::Video), Rational::new(1, 90000), 0);
        info.is_attached_picture = true;
        self.streams.push(info);
        self
    }

    pub fn with_unopenable_video(mut self, index: usize) -> Self {
        self.streams
            .push(Self::stream_info(index, Some(MediaFrameType::Video), Rational::new(1, 90000), 0));
        self.unopenable.insert(index);
        self
    }

    pub fn failing_stream_info(mut self) -> Self {
        self.fail_stream_info = true;
        self
    }

    /// 为某个流生成 `count` 个包（步长为流时间基单位），按时间与已有包交错
    pub fn with_packets(mut self, stream_index: usize, count: usize, step: i64, keyframe_interval: usize) -> Self {
        for i in 0..count {
            self.packets.push(Packet {
                stream_index,
                pts: i as i64 * step,
                dts: i as i64 * step,
                duration: step,
                is_keyframe: keyframe_interval > 0 && i % keyframe_interval == 0,
                data: vec![0u8; 8],
            });
        }
        let seconds = |p: &Packet, streams: &[StreamInfo]| -> f64 {
            streams
                .iter()
                .find(|s| s.index == p.stream_index)
                .map(|s| p.pts as f64 * s.timebase.as_f64())
                .unwrap_or(0.0)
        };
        let streams = self.streams.clone();
        self.packets
            .sort_by(|a, b| seconds(a, &streams).total_cmp(&seconds(b, &streams)));
        self
    }

    /// 重新设置视频关键帧间隔
    pub fn with_keyframe_interval(mut self, interval: usize) -> Self {
        let mut n = 0usize;
        for packet in self.packets.iter_mut().filter(|p| p.stream_index == 0) {
            packet.is_keyframe = n % interval == 0;
            n += 1;
        }
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// 所有包整体后移 `seconds`（按各自流的时间基）
    pub fn starting_at(mut self, seconds: f64) -> Self {
        for packet in &mut self.packets {
            let Some(stream) = self.streams.iter().find(|s| s.index == packet.stream_index) else {
                continue;
            };
            let offset = (seconds / stream.timebase.as_f64()).round() as i64;
            packet.pts += offset;
            packet.dts += offset;
        }
        self
    }

    /// 第 `nth` 个视频包送入解码器时失败
    pub fn with_corrupt_video_packet(mut self, nth: usize) -> Self {
        if let Some(packet) = self.packets.iter_mut().filter(|p| p.stream_index == 0).nth(nth) {
            packet.data = b"bad".to_vec();
        }
        self
    }
}

impl Default for FakeSource {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FakeDemuxer {
    source: FakeSource,
    cursor: usize,
}

impl Demuxer for FakeDemuxer {
    fn find_stream_info(&mut self) -> Result<(), SourceOpenError> {
        if self.source.fail_stream_info {
            Err(SourceOpenError::CannotFindStreamInfo)
        } else {
            Ok(())
        }
    }

    fn streams(&self) -> Vec<StreamInfo> {
        self.source.streams.clone()
    }

    fn open_codec(&mut self, stream_index: usize) -> Option<Box<dyn Codec>> {
        if self.source.unopenable.contains(&stream_index) {
            return None;
        }
        let medium = self
            .source
            .streams
            .iter()
            .find(|s| s.index == stream_index)?
            .medium?;
        Some(Box::new(PacketEchoCodec {
            medium,
            pending: VecDeque::new(),
            log: self.source.log.clone(),
        }))
    }

    fn read_packet(&mut self) -> ReadResult {
        if let Some(delay) = self.source.read_delay {
            std::thread::sleep(delay);
        }
        match self.source.packets.get(self.cursor) {
            Some(packet) => {
                self.cursor += 1;
                ReadResult::Packet(packet.clone())
            }
            None => ReadResult::EndOfFile,
        }
    }

    fn seek(&mut self, stream_index: usize, timestamp: i64, keyframe_only: bool) -> bool {
        self.source.log.lock().seeks.push((stream_index, timestamp));
        let target = self
            .source
            .packets
            .iter()
            .enumerate()
            .filter(|(_, p)| p.stream_index == stream_index && p.pts <= timestamp && (p.is_keyframe || !keyframe_only))
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0);
        self.cursor = target;
        true
    }

    fn description(&self) -> String {
        format!("FakeDemuxer({} packets)", self.source.packets.len())
    }
}

/// 按 URL 提供脚本化媒体源
#[derive(Default)]
pub struct FakeOpener {
    sources: Mutex<HashMap<String, FakeSource>>,
    pub opened: Mutex<Vec<String>>,
}

impl FakeOpener {
    pub fn single(url: &str, source: FakeSource) -> Arc<Self> {
        let opener = Arc::new(Self::default());
        opener.insert(url, source);
        opener
    }

    pub fn insert(&self, url: &str, source: FakeSource) {
        self.sources.lock().insert(url.to_string(), source);
    }
}

impl SourceOpener for FakeOpener {
    fn open_input(&self, url: &str) -> Result<Box<dyn Demuxer>, SourceOpenError> {
        self.opened.lock().push(url.to_string());
        let source = self
            .sources
            .lock()
            .get(url)
            .cloned()
            .ok_or(SourceOpenError::CannotOpenInput)?;
        Ok(Box::new(FakeDemuxer { source, cursor: 0 }))
    }
}

// ============= 音频引擎 =============

#[derive(Default)]
struct EngineLog {
    scheduled: Vec<MediaTime>,
    pending: VecDeque<PlayedCallback>,
    plays: usize,
    pauses: usize,
    stops: usize,
    resets: usize,
    rates: Vec<f32>,
    volumes: Vec<f32>,
}

/// 记录调用的音频引擎；缓冲只有在 `complete_next` 时才算播放完
#[derive(Default)]
pub struct FakeAudioEngine {
    log: Mutex<EngineLog>,
}

impl FakeAudioEngine {
    /// 曾经调度过的所有缓冲的 pts
    pub fn scheduled_pts(&self) -> Vec<MediaTime> {
        self.log.lock().scheduled.clone()
    }

    /// 让最早调度的一个缓冲播放完毕
    pub fn complete_next(&self) -> bool {
        let callback = self.log.lock().pending.pop_front();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.log.lock().pending.len()
    }

    pub fn plays(&self) -> usize {
        self.log.lock().plays
    }

    pub fn pauses(&self) -> usize {
        self.log.lock().pauses
    }

    pub fn stops(&self) -> usize {
        self.log.lock().stops
    }

    pub fn resets(&self) -> usize {
        self.log.lock().resets
    }

    pub fn rates(&self) -> Vec<f32> {
        self.log.lock().rates.clone()
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.log.lock().volumes.clone()
    }
}

impl AudioEngine for FakeAudioEngine {
    fn play(&self) -> PlayerResult<()> {
        self.log.lock().plays += 1;
        Ok(())
    }

    fn pause(&self) {
        self.log.lock().pauses += 1;
    }

    fn stop(&self) {
        self.log.lock().stops += 1;
    }

    fn reset(&self) {
        let mut log = self.log.lock();
        log.resets += 1;
        log.pending.clear();
    }

    fn schedule(&self, buffer: AudioBuffer, on_played: PlayedCallback) {
        let mut log = self.log.lock();
        log.scheduled.push(buffer.pts);
        log.pending.push_back(on_played);
    }

    fn set_rate(&self, rate: f32) {
        self.log.lock().rates.push(rate);
    }

    fn set_volume(&self, volume: f32) {
        self.log.lock().volumes.push(volume);
    }
}

// ============= 视频呈现 =============

/// 记录每次呈现的纹理 pts
#[derive(Default)]
pub struct RecordingSink {
    presented: Mutex<Vec<MediaTime>>,
}

impl RecordingSink {
    pub fn presented_seconds(&self) -> Vec<f64> {
        self.presented.lock().iter().map(|t| t.seconds()).collect()
    }
}

impl VideoSink for RecordingSink {
    fn present(&self, texture: &VideoTexture) {
        self.presented.lock().push(texture.pts);
    }
}

// ============= 清单解析 =============

/// 按 URL 返回预设的码率变体列表
#[derive(Default)]
pub struct FakeResolver {
    variants: Mutex<HashMap<String, Vec<Variant>>>,
}

impl FakeResolver {
    pub fn with(url: &str, variants: Vec<Variant>) -> Arc<Self> {
        let resolver = Arc::new(Self::default());
        resolver.variants.lock().insert(url.to_string(), variants);
        resolver
    }
}

impl VariantResolver for FakeResolver {
    fn resolve(&self, url: &str) -> anyhow::Result<Vec<Variant>> {
        self.variants
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("清单不存在: {}", url))
    }
}

/// 轮询等待条件成立
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
