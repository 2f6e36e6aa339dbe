use crate::core::{MediaFrameType, Packet, Rational, SourceOpenError};
use crate::player::decoder::AudioOutputFormat;

/// 解封装库给出的流描述
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    /// None 表示字幕/数据等本内核不关心的流
    pub medium: Option<MediaFrameType>,
    /// 封面图之类的"附加图片"流，扫描时跳过
    pub is_attached_picture: bool,
    pub fps: Rational,
    pub timebase: Rational,
    /// 流时间基单位；未知时为 0
    pub duration: i64,
    /// 流时间基单位；未知时为 0
    pub start_time: i64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 读包结果
#[derive(Debug)]
pub enum ReadResult {
    Packet(Packet),
    EndOfFile,
    Error(String),
}

/// Demuxer 数据源抽象接口
///
/// 这个 trait 定义了解封装库必须提供的方法，
/// 不同的实现（FFmpeg、测试脚本等）都可以接入解码编排器。
pub trait Demuxer: Send {
    /// 读取流元数据
    fn find_stream_info(&mut self) -> Result<(), SourceOpenError>;

    /// 当前容器内的所有流
    fn streams(&self) -> Vec<StreamInfo>;

    /// 为指定流打开解码器；失败返回 None
    fn open_codec(&mut self, stream_index: usize) -> Option<Box<dyn Codec>>;

    /// 读取下一个数据包
    fn read_packet(&mut self) -> ReadResult;

    /// Seek 到 `timestamp`（流时间基单位），`keyframe_only` 时落在不晚于目标的关键帧
    fn seek(&mut self, stream_index: usize, timestamp: i64, keyframe_only: bool) -> bool;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 打开输入的工厂（网络流/本地文件由具体实现决定）
pub trait SourceOpener: Send + Sync {
    fn open_input(&self, url: &str) -> Result<Box<dyn Demuxer>, SourceOpenError>;
}

/// 采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }
}

/// 解码器原始音频帧
#[derive(Debug, Clone)]
pub struct RawAudioFrame {
    /// 流时间基单位；None 表示解码器未给出
    pub pts: Option<i64>,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// planar 时每声道一个平面，否则只有一个交错平面
    pub planar: bool,
    pub samples: usize,
    pub planes: Vec<Vec<u8>>,
}

/// 原始视频帧的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawPixelFormat {
    /// 硬件表面（可零拷贝呈现）
    Hardware,
    Yuv420p,
    Yuva420p,
    Other(i32),
}

/// 解码器原始视频帧
#[derive(Clone)]
pub struct RawVideoFrame {
    pub pts: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub format: RawPixelFormat,
    pub planes: Vec<Vec<u8>>,
    pub line_sizes: Vec<usize>,
    /// 仅在 Hardware 格式下存在
    pub hardware_surface: Option<crate::core::HardwareSurface>,
}

impl std::fmt::Debug for RawVideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawVideoFrame")
            .field("pts", &self.pts)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("line_sizes", &self.line_sizes)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum RawFrame {
    Audio(RawAudioFrame),
    Video(RawVideoFrame),
}

/// 接收解码帧的结果
#[derive(Debug)]
pub enum Received {
    Frame(RawFrame),
    /// 需要更多输入（EAGAIN）
    NotReady,
    Error(String),
}

/// 底层解码器："送入压缩包 / 取出解码帧"
pub trait Codec: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), String>;

    fn receive_frame(&mut self) -> Received;

    /// 尝试启用硬件加速，返回是否成功
    fn enable_hardware_acceleration(&mut self) -> bool {
        false
    }

    /// 清空解码器内部缓冲（seek 之后调用）
    fn flush_buffers(&mut self);

    /// 为本解码器产出的音频帧创建到 `target` 的重采样器；不支持时返回 None
    fn create_resampler(&self, _target: AudioOutputFormat) -> Option<Box<dyn AudioResampler>> {
        None
    }
}

/// 音频重采样：任意采样格式/采样率/声道 → 输出格式（S16 交错）
///
/// 实现需要跨帧保留内部状态（滤波器延迟），源格式变化时自行重建。
pub trait AudioResampler: Send {
    /// 转换一帧，结果追加到 `out`；返回追加的输出帧数（每声道采样数），无法转换时返回 None
    fn convert(&mut self, frame: &RawAudioFrame, out: &mut Vec<i16>) -> Option<usize>;
}
