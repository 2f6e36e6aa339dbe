use crate::core::time::{MediaTime, Rational};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 帧/任务的媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFrameType {
    Audio,
    Video,
}

impl MediaFrameType {
    /// 另一种媒体类型（溢出帧路由时使用）
    pub fn other(&self) -> Self {
        match self {
            MediaFrameType::Audio => MediaFrameType::Video,
            MediaFrameType::Video => MediaFrameType::Audio,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFrameType::Audio => "音频",
            MediaFrameType::Video => "视频",
        }
    }
}

/// 解封装得到的压缩数据包（对本内核不透明）
///
/// 时间戳使用所属流的时间基单位。
#[derive(Clone, Default)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub is_keyframe: bool,
    pub data: Vec<u8>,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("duration", &self.duration)
            .field("is_keyframe", &self.is_keyframe)
            .field("size", &self.data.len())
            .finish()
    }
}

/// 待解码帧：按包创建，交给对应解码器后即丢弃
#[derive(Debug, Clone)]
pub struct DecodableFrame {
    pub frame_type: MediaFrameType,
    pub packet: Packet,
    pub pts: MediaTime,
    pub dts: MediaTime,
    pub duration: MediaTime,
}

/// 已转换的 PCM 采样（有符号 16 位，本机字节序，交错排列）
#[derive(Debug, Clone, PartialEq)]
pub struct PcmSamples {
    pub sample_rate: u32,
    pub channels: u16,
    pub data: Vec<i16>,
}

impl PcmSamples {
    /// 每声道采样数
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels as usize
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

/// 可呈现图像的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Y 平面 + 交错 UV 平面（双平面 4:2:0）
    NV12,
    /// Y 平面 + 交错 UV 平面 + Alpha 平面（三平面）
    NV12A,
}

impl PixelFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::NV12 => 2,
            PixelFormat::NV12A => 3,
        }
    }
}

/// 图像平面（带行跨度）
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub stride: usize,
    pub rows: usize,
    pub data: Vec<u8>,
}

impl Plane {
    pub fn zeroed(stride: usize, rows: usize) -> Self {
        Self {
            stride,
            rows,
            data: vec![0u8; stride * rows],
        }
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.stride..(y + 1) * self.stride]
    }
}

/// 软件路径产生的可呈现图像
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

/// 硬件解码器直接产出的表面句柄（零拷贝路径）
#[derive(Clone)]
pub struct HardwareSurface {
    pub width: u32,
    pub height: u32,
    pub handle: Arc<dyn std::any::Any + Send + Sync>,
}

impl fmt::Debug for HardwareSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareSurface({}x{})", self.width, self.height)
    }
}

/// 解码后的视频图像
#[derive(Debug, Clone)]
pub enum VideoImage {
    Hardware(HardwareSurface),
    Planar(PlanarImage),
}

impl VideoImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            VideoImage::Hardware(surface) => (surface.width, surface.height),
            VideoImage::Planar(image) => (image.width, image.height),
        }
    }
}

/// 解码后的采样容器
#[derive(Debug, Clone)]
pub enum DecodedSample {
    Audio(PcmSamples),
    Video(VideoImage),
}

/// 解码后的媒体帧，由持有它的缓冲区拥有，渲染或清空时销毁
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub frame_type: MediaFrameType,
    pub sample: DecodedSample,
    pts: MediaTime,
    duration: MediaTime,
}

impl MediaFrame {
    pub fn new(frame_type: MediaFrameType, sample: DecodedSample, pts: MediaTime, duration: MediaTime) -> Self {
        Self {
            frame_type,
            sample,
            pts,
            duration,
        }
    }

    /// 呈现位置（= pts）
    pub fn position(&self) -> MediaTime {
        self.pts
    }

    pub fn duration(&self) -> MediaTime {
        self.duration
    }
}

/// 编解码器句柄：同一时刻只由一个解码器使用，切流时重新绑定
#[derive(Clone)]
pub struct CodecHandle(Arc<parking_lot::Mutex<Box<dyn crate::player::demuxer_source::Codec>>>);

impl CodecHandle {
    pub fn new(codec: Box<dyn crate::player::demuxer_source::Codec>) -> Self {
        Self(Arc::new(parking_lot::Mutex::new(codec)))
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, Box<dyn crate::player::demuxer_source::Codec>> {
        self.0.lock()
    }

    pub fn same_as(&self, other: &CodecHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for CodecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodecHandle({:p})", Arc::as_ptr(&self.0))
    }
}

/// 流类型专属字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio { sample_rate: u32, channel_count: u16 },
    Video,
}

/// 活跃音频/视频流的上下文，创建后不可变，切流时整体替换
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub index: usize,
    pub fps: Rational,
    pub timebase: Rational,
    pub duration: MediaTime,
    pub start_time: MediaTime,
    pub codec: CodecHandle,
    pub kind: StreamKind,
}

impl StreamContext {
    pub fn frame_type(&self) -> MediaFrameType {
        match self.kind {
            StreamKind::Audio { .. } => MediaFrameType::Audio,
            StreamKind::Video => MediaFrameType::Video,
        }
    }

    /// 流时间基单位的时间戳 → 媒体时间
    pub fn time_from_stream_ts(&self, ts: i64) -> MediaTime {
        let timebase = self.effective_timebase();
        MediaTime::new(ts * timebase.numerator as i64, timebase.denominator)
    }

    /// 媒体时间 → 流时间基单位的时间戳（seek 使用）
    pub fn stream_ts_from_time(&self, time: MediaTime) -> i64 {
        let timebase = self.effective_timebase();
        let seconds = time.seconds();
        (seconds * timebase.denominator as f64 / timebase.numerator as f64).round() as i64
    }

    fn effective_timebase(&self) -> Rational {
        if self.timebase.is_valid() && self.timebase.denominator > 0 {
            self.timebase
        } else {
            Rational::new(1, DEFAULT_TIMEBASE_DENOMINATOR)
        }
    }
}

/// 缺失时间基时使用的默认值（1/40000）
pub const DEFAULT_TIMEBASE_DENOMINATOR: i32 = 40000;

/// 缓冲区状态（由当前占用量推导，不存储）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Full,
    NeedCount(usize),
}

/// Seek 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeekKind {
    Default,
    StreamSwitch,
}

/// 单个媒体是否已到达 seek 有效位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekReach {
    NotReached,
    Reached,
}

/// 进行中的 seek 状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekStatus {
    pub kind: SeekKind,
    pub target: MediaTime,
    pub video: SeekReach,
    pub audio: SeekReach,
}

impl SeekStatus {
    pub fn new(kind: SeekKind, target: MediaTime) -> Self {
        Self {
            kind,
            target,
            video: SeekReach::NotReached,
            audio: SeekReach::NotReached,
        }
    }

    pub fn reach(&self, frame_type: MediaFrameType) -> SeekReach {
        match frame_type {
            MediaFrameType::Audio => self.audio,
            MediaFrameType::Video => self.video,
        }
    }

    pub fn mark_reached(&mut self, frame_type: MediaFrameType) {
        match frame_type {
            MediaFrameType::Audio => self.audio = SeekReach::Reached,
            MediaFrameType::Video => self.video = SeekReach::Reached,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.video == SeekReach::Reached && self.audio == SeekReach::Reached
    }
}

/// 码率变体的分辨率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const FULL_HD_1080P: Resolution = Resolution { width: 1920, height: 1080 };
    pub const HD_720P: Resolution = Resolution { width: 1280, height: 720 };
    pub const SD_480P: Resolution = Resolution { width: 852, height: 480 };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// 同一内容的一个码率/画质版本（由外部清单解析器给出）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    pub bandwidth: u64,
    pub resolution: Resolution,
    pub url: String,
}

impl Variant {
    pub fn new(bandwidth: u64, resolution: Resolution, url: impl Into<String>) -> Self {
        Self {
            bandwidth,
            resolution,
            url: url.into(),
        }
    }
}

/// 渲染器就绪状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererState {
    Unprepared,
    Rendering,
    Paused,
    Stopped,
}

/// 播放状态（相互独立的布尔值，缓冲/seek 可与播放/暂停重叠）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub is_playing: bool,
    pub is_buffering: bool,
    pub is_seeking: bool,
}

/// 缓冲统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferingStatistics {
    pub buffering_count: u32,
    pub total_buffering_time: f64,
    pub playback_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_status_completes_when_both_reached() {
        let mut status = SeekStatus::new(SeekKind::Default, MediaTime::new(10, 1));
        assert!(!status.is_complete());
        status.mark_reached(MediaFrameType::Video);
        assert_eq!(status.reach(MediaFrameType::Audio), SeekReach::NotReached);
        status.mark_reached(MediaFrameType::Audio);
        assert!(status.is_complete());
    }

    #[test]
    fn pcm_samples_expose_native_endian_bytes() {
        let pcm = PcmSamples {
            sample_rate: 44100,
            channels: 1,
            data: vec![1, -1],
        };
        assert_eq!(pcm.frame_count(), 2);
        assert_eq!(pcm.as_bytes().len(), 4);
        assert_eq!(&pcm.as_bytes()[0..2], &1i16.to_ne_bytes());
    }
}
