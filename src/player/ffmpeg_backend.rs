use crate::core::{log_ctx, MediaFrameType, Packet, Rational, Result, SourceOpenError};
use crate::player::decoder::AudioOutputFormat;
use crate::player::demuxer_source::{
    AudioResampler, Codec, Demuxer, RawAudioFrame, RawFrame, RawPixelFormat, RawVideoFrame, ReadResult, Received, SampleFormat,
    SourceOpener, StreamInfo,
};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};

/// 判断是否为网络流（需要网络优化选项）
fn is_network_url(url: &str) -> bool {
    url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("rtsp://")
        || url.starts_with("rtmp://")
        || url.contains(".m3u8")
}

/// 流时间基单位 → AV_TIME_BASE（微秒）
fn to_av_time(timestamp: i64, timebase: Rational) -> i64 {
    if !timebase.is_valid() {
        return timestamp;
    }
    (timestamp as i128 * timebase.numerator as i128 * 1_000_000 / timebase.denominator as i128) as i64
}

fn rational(value: ffmpeg::Rational) -> Rational {
    Rational::new(value.numerator(), value.denominator())
}

/// FFmpeg 打开器
pub struct FfmpegOpener {
    network_options: Vec<(String, String)>,
}

impl FfmpegOpener {
    pub fn new() -> Result<Self> {
        ffmpeg::init()?;
        info!("{} ✅ FFmpeg 初始化成功", log_ctx());
        Ok(Self {
            network_options: Self::default_network_options(),
        })
    }

    /// 覆盖或追加一个网络流打开选项
    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.network_options.retain(|(k, _)| k != key);
        self.network_options.push((key.to_string(), value.to_string()));
        self
    }

    fn default_network_options() -> Vec<(String, String)> {
        [
            // 丢弃损坏帧、生成缺失的 PTS
            ("fflags", "+discardcorrupt+genpts"),
            ("analyzeduration", "5000000"),
            ("probesize", "10000000"),
            ("timeout", "15000000"),
            ("buffer_size", "8388608"),
            ("rw_timeout", "8000000"),
            ("reconnect", "1"),
            ("reconnect_streamed", "1"),
            ("reconnect_delay_max", "4"),
            ("http_persistent", "1"),
            ("max_reload", "10"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

impl SourceOpener for FfmpegOpener {
    fn open_input(&self, url: &str) -> std::result::Result<Box<dyn Demuxer>, SourceOpenError> {
        let input = if is_network_url(url) {
            info!("{} 🌐 检测到网络流，应用优化选项", log_ctx());
            let mut options = ffmpeg::Dictionary::new();
            for (key, value) in &self.network_options {
                options.set(key, value);
            }
            format::input_with_dictionary(&url, options)
        } else {
            format::input(&url)
        };
        let input = input.map_err(|e| {
            warn!("{} ❌ FFmpeg 无法打开 {}: {}", log_ctx(), url, e);
            SourceOpenError::CannotOpenInput
        })?;
        Ok(Box::new(FfmpegDemuxer {
            input,
            url: url.to_string(),
        }))
    }
}

/// FFmpeg 解封装器
pub struct FfmpegDemuxer {
    input: format::context::Input,
    url: String,
}

// 输入上下文只被持有它的 MediaSource 在锁内访问
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    fn timebase_of(&self, stream_index: usize) -> Rational {
        self.input
            .stream(stream_index)
            .map(|s| rational(s.time_base()))
            .unwrap_or_default()
    }
}

impl Demuxer for FfmpegDemuxer {
    fn find_stream_info(&mut self) -> std::result::Result<(), SourceOpenError> {
        // avformat_find_stream_info 已在打开时执行，这里只检查结果
        if self.input.nb_streams() == 0 {
            return Err(SourceOpenError::CannotFindStreamInfo);
        }
        Ok(())
    }

    fn streams(&self) -> Vec<StreamInfo> {
        self.input
            .streams()
            .map(|stream| {
                let parameters = stream.parameters();
                let medium = match parameters.medium() {
                    media::Type::Video => Some(MediaFrameType::Video),
                    media::Type::Audio => Some(MediaFrameType::Audio),
                    _ => None,
                };
                let (sample_rate, channels) = if medium == Some(MediaFrameType::Audio) {
                    codec::context::Context::from_parameters(parameters)
                        .and_then(|c| c.decoder().audio())
                        .map(|a| (a.rate(), a.channels()))
                        .unwrap_or((0, 0))
                } else {
                    (0, 0)
                };
                let start_time = stream.start_time();
                StreamInfo {
                    index: stream.index(),
                    medium,
                    is_attached_picture: stream
                        .disposition()
                        .contains(format::stream::Disposition::ATTACHED_PIC),
                    fps: rational(stream.avg_frame_rate()),
                    timebase: rational(stream.time_base()),
                    duration: stream.duration().max(0),
                    // AV_NOPTS_VALUE 记为 0
                    start_time: if start_time == i64::MIN { 0 } else { start_time },
                    sample_rate,
                    channels,
                }
            })
            .collect()
    }

    fn open_codec(&mut self, stream_index: usize) -> Option<Box<dyn Codec>> {
        let stream = self.input.stream(stream_index)?;
        let medium = stream.parameters().medium();
        let context = codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| warn!("⚠ 流 #{} 无法创建解码上下文: {}", stream_index, e))
            .ok()?;
        let codec: Box<dyn Codec> = match medium {
            media::Type::Video => Box::new(FfmpegCodec::Video {
                decoder: context.decoder().video().ok()?,
                scaler: None,
            }),
            media::Type::Audio => Box::new(FfmpegCodec::Audio {
                decoder: context.decoder().audio().ok()?,
            }),
            _ => return None,
        };
        Some(codec)
    }

    fn read_packet(&mut self) -> ReadResult {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => ReadResult::Packet(Packet {
                stream_index: packet.stream(),
                pts: packet.pts().or(packet.dts()).unwrap_or(0),
                dts: packet.dts().or(packet.pts()).unwrap_or(0),
                duration: packet.duration(),
                is_keyframe: packet.is_key(),
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
            Err(ffmpeg::Error::Eof) => ReadResult::EndOfFile,
            Err(e) => ReadResult::Error(e.to_string()),
        }
    }

    fn seek(&mut self, stream_index: usize, timestamp: i64, _keyframe_only: bool) -> bool {
        let target = to_av_time(timestamp, self.timebase_of(stream_index));
        // max_ts = target：落在不晚于目标的关键帧
        match self.input.seek(target, ..target) {
            Ok(()) => true,
            Err(e) => {
                warn!("{} ⚠ FFmpeg seek 失败: {}", log_ctx(), e);
                false
            }
        }
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.url)
    }
}

/// FFmpeg 解码器
pub enum FfmpegCodec {
    Video {
        decoder: ffmpeg::decoder::Video,
        /// 非 YUV420P 的软件帧先转换成 YUV420P
        scaler: Option<software::scaling::Context>,
    },
    Audio {
        decoder: ffmpeg::decoder::Audio,
    },
}

// swscale 上下文只在持有它的解码线程上使用
unsafe impl Send for FfmpegCodec {}

impl FfmpegCodec {
    fn receive_video(
        decoder: &mut ffmpeg::decoder::Video,
        scaler: &mut Option<software::scaling::Context>,
    ) -> std::result::Result<Option<RawVideoFrame>, ffmpeg::Error> {
        let mut frame = ffmpeg::frame::Video::empty();
        if !receive(decoder.receive_frame(&mut frame))? {
            return Ok(None);
        }
        let pts = frame.pts();
        let (format, frame) = match frame.format() {
            format::Pixel::YUV420P => (RawPixelFormat::Yuv420p, frame),
            format::Pixel::YUVA420P => (RawPixelFormat::Yuva420p, frame),
            other => {
                if scaler.is_none() {
                    debug!("视频像素格式 {:?}，转换为 YUV420P", other);
                    *scaler = Some(software::scaling::Context::get(
                        other,
                        frame.width(),
                        frame.height(),
                        format::Pixel::YUV420P,
                        frame.width(),
                        frame.height(),
                        software::scaling::Flags::BILINEAR,
                    )?);
                }
                let Some(context) = scaler.as_mut() else {
                    return Ok(None);
                };
                let mut converted = ffmpeg::frame::Video::empty();
                context.run(&frame, &mut converted)?;
                (RawPixelFormat::Yuv420p, converted)
            }
        };
        let plane_count = frame.planes();
        Ok(Some(RawVideoFrame {
            pts,
            width: frame.width(),
            height: frame.height(),
            format,
            planes: (0..plane_count).map(|i| frame.data(i).to_vec()).collect(),
            line_sizes: (0..plane_count).map(|i| frame.stride(i)).collect(),
            hardware_surface: None,
        }))
    }

    fn receive_audio(
        decoder: &mut ffmpeg::decoder::Audio,
    ) -> std::result::Result<Option<RawAudioFrame>, ffmpeg::Error> {
        let mut frame = ffmpeg::frame::Audio::empty();
        if !receive(decoder.receive_frame(&mut frame))? {
            return Ok(None);
        }
        let (format, planar) = match frame.format() {
            format::Sample::U8(kind) => (SampleFormat::U8, kind),
            format::Sample::I16(kind) => (SampleFormat::I16, kind),
            format::Sample::I32(kind) => (SampleFormat::I32, kind),
            format::Sample::F32(kind) => (SampleFormat::F32, kind),
            format::Sample::F64(kind) => (SampleFormat::F64, kind),
            other => {
                debug!("不支持的采样格式: {:?}", other);
                return Ok(None);
            }
        };
        let planar = planar == format::sample::Type::Planar;
        let channels = frame.channels();
        let samples = frame.samples();
        let plane_bytes = if planar {
            samples * format.bytes_per_sample()
        } else {
            samples * format.bytes_per_sample() * channels as usize
        };
        let planes = (0..frame.planes())
            .map(|i| {
                let data = frame.data(i);
                data[..plane_bytes.min(data.len())].to_vec()
            })
            .collect();
        Ok(Some(RawAudioFrame {
            pts: frame.pts(),
            sample_rate: frame.rate(),
            channels,
            format,
            planar,
            samples,
            planes,
        }))
    }
}

// ========== 重采样 ==========

/// 源格式签名，变化时重建 swresample 上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceSignature {
    format: SampleFormat,
    planar: bool,
    sample_rate: u32,
    channels: u16,
}

fn sample_format(format: SampleFormat, planar: bool) -> format::Sample {
    let kind = if planar {
        format::sample::Type::Planar
    } else {
        format::sample::Type::Packed
    };
    match format {
        SampleFormat::U8 => format::Sample::U8(kind),
        SampleFormat::I16 => format::Sample::I16(kind),
        SampleFormat::I32 => format::Sample::I32(kind),
        SampleFormat::F32 => format::Sample::F32(kind),
        SampleFormat::F64 => format::Sample::F64(kind),
    }
}

fn channel_layout(channels: u16) -> util::channel_layout::ChannelLayout {
    match channels {
        1 => util::channel_layout::ChannelLayout::MONO,
        2 => util::channel_layout::ChannelLayout::STEREO,
        6 => util::channel_layout::ChannelLayout::_5POINT1,
        n => util::channel_layout::ChannelLayout::default(n as i32),
    }
}

/// swresample 重采样器：任意输入 → S16 交错的输出格式
pub struct SwrResampler {
    target: AudioOutputFormat,
    source: Option<SourceSignature>,
    context: Option<software::resampling::Context>,
}

// 重采样上下文只在持有它的解码线程上使用
unsafe impl Send for SwrResampler {}

impl SwrResampler {
    pub fn new(target: AudioOutputFormat) -> Self {
        Self {
            target,
            source: None,
            context: None,
        }
    }

    fn context_for(
        &mut self,
        signature: SourceSignature,
    ) -> std::result::Result<&mut software::resampling::Context, ffmpeg::Error> {
        if self.source != Some(signature) || self.context.is_none() {
            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch/{:?} → {}Hz/{}ch/S16",
                signature.sample_rate, signature.channels, signature.format, self.target.sample_rate, self.target.channels
            );
            let context = software::resampling::Context::get(
                sample_format(signature.format, signature.planar),
                channel_layout(signature.channels),
                signature.sample_rate,
                format::Sample::I16(format::sample::Type::Packed),
                channel_layout(self.target.channels),
                self.target.sample_rate,
            )?;
            self.context = Some(context);
            self.source = Some(signature);
        }
        self.context.as_mut().ok_or(ffmpeg::Error::Bug)
    }

    fn input_frame(frame: &RawAudioFrame) -> ffmpeg::frame::Audio {
        let mut input = ffmpeg::frame::Audio::new(
            sample_format(frame.format, frame.planar),
            frame.samples,
            channel_layout(frame.channels),
        );
        input.set_rate(frame.sample_rate);
        for (i, plane) in frame.planes.iter().enumerate().take(input.planes()) {
            let data = input.data_mut(i);
            let len = plane.len().min(data.len());
            data[..len].copy_from_slice(&plane[..len]);
        }
        input
    }
}

impl AudioResampler for SwrResampler {
    fn convert(&mut self, frame: &RawAudioFrame, out: &mut Vec<i16>) -> Option<usize> {
        if frame.sample_rate == 0 || frame.channels == 0 || frame.samples == 0 {
            return None;
        }
        let signature = SourceSignature {
            format: frame.format,
            planar: frame.planar,
            sample_rate: frame.sample_rate,
            channels: frame.channels,
        };
        let channels = self.target.channels.max(1) as usize;
        let input = Self::input_frame(frame);
        let context = self
            .context_for(signature)
            .map_err(|e| warn!("{} ⚠ 无法创建重采样上下文: {}", log_ctx(), e))
            .ok()?;

        let mut resampled = ffmpeg::frame::Audio::empty();
        if let Err(e) = context.run(&input, &mut resampled) {
            warn!("⚠ 音频重采样失败: {}", e);
            return None;
        }
        let produced = resampled.samples();
        let bytes = produced * channels * 2;
        let data = resampled.data(0);
        if data.len() < bytes {
            warn!("⚠ 重采样输出数据不足（{} < {}）", data.len(), bytes);
            return None;
        }
        out.extend(data[..bytes].chunks_exact(2).map(bytemuck::pod_read_unaligned::<i16>));
        Some(produced)
    }
}

/// 解码器返回 EAGAIN / EOF 时视为"暂无帧"
fn receive(result: std::result::Result<(), ffmpeg::Error>) -> std::result::Result<bool, ffmpeg::Error> {
    match result {
        Ok(()) => Ok(true),
        Err(ffmpeg::Error::Other { errno }) if errno == util::error::EAGAIN => Ok(false),
        Err(ffmpeg::Error::Eof) => Ok(false),
        Err(e) => Err(e),
    }
}

impl Codec for FfmpegCodec {
    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), String> {
        let mut native = ffmpeg::Packet::copy(&packet.data);
        native.set_stream(packet.stream_index);
        native.set_pts(Some(packet.pts));
        native.set_dts(Some(packet.dts));
        native.set_duration(packet.duration);
        if packet.is_keyframe {
            native.set_flags(codec::packet::Flags::KEY);
        }
        let result = match self {
            FfmpegCodec::Video { decoder, .. } => decoder.send_packet(&native),
            FfmpegCodec::Audio { decoder } => decoder.send_packet(&native),
        };
        result.map_err(|e| e.to_string())
    }

    fn receive_frame(&mut self) -> Received {
        let result = match self {
            FfmpegCodec::Video { decoder, scaler } => {
                Self::receive_video(decoder, scaler).map(|f| f.map(RawFrame::Video))
            }
            FfmpegCodec::Audio { decoder } => Self::receive_audio(decoder).map(|f| f.map(RawFrame::Audio)),
        };
        match result {
            Ok(Some(frame)) => Received::Frame(frame),
            Ok(None) => Received::NotReady,
            Err(e) => Received::Error(e.to_string()),
        }
    }

    fn enable_hardware_acceleration(&mut self) -> bool {
        // ffmpeg-next 没有暴露 hw_device_ctx，视频始终走软件路径
        debug!("FFmpeg 后端不支持硬件加速，使用软件解码");
        false
    }

    fn flush_buffers(&mut self) {
        match self {
            FfmpegCodec::Video { decoder, .. } => decoder.flush(),
            FfmpegCodec::Audio { decoder } => decoder.flush(),
        }
    }

    fn create_resampler(&self, target: AudioOutputFormat) -> Option<Box<dyn AudioResampler>> {
        match self {
            FfmpegCodec::Audio { .. } => Some(Box::new(SwrResampler::new(target))),
            FfmpegCodec::Video { .. } => None,
        }
    }
}
