use crate::core::{
    CodecHandle, DecodableFrame, DecodedSample, MediaFrame, MediaFrameType, MediaTime, PcmSamples, PixelFormat,
    PlanarImage, Plane, Rational, StreamContext, VideoImage,
};
use crate::player::demuxer_source::{AudioResampler, RawFrame, RawPixelFormat, RawVideoFrame, Received};
use log::{debug, trace, warn};

/// 帧解码器：把压缩包变为带时间戳的可呈现帧
///
/// 每个流一个实例，切流时通过 `setup` 重新绑定编解码器，不重新创建。
pub trait FrameDecoder: Send {
    fn decode(&mut self, frame: &DecodableFrame) -> Option<MediaFrame>;

    fn setup(&mut self, stream: &StreamContext);
}

// ============= 音频 =============

/// 输出音频格式（有符号 16 位，本机字节序，交错）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioOutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioOutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
        }
    }
}

/// 音频解码器
///
/// 重采样由编解码器后端提供（FFmpeg 后端为 swresample），
/// 后端不提供时该流的音频全部丢弃。
pub struct AudioDecoder {
    codec: CodecHandle,
    resampler: Option<Box<dyn AudioResampler>>,
    output: AudioOutputFormat,
}

impl AudioDecoder {
    pub fn new(stream: &StreamContext, output: AudioOutputFormat) -> Self {
        Self {
            codec: stream.codec.clone(),
            resampler: Self::resampler_for(stream, output),
            output,
        }
    }

    fn resampler_for(stream: &StreamContext, output: AudioOutputFormat) -> Option<Box<dyn AudioResampler>> {
        let resampler = stream.codec.lock().create_resampler(output);
        if resampler.is_none() {
            warn!("⚠ 流 #{} 的解码后端不提供音频重采样，音频将被丢弃", stream.index);
        }
        resampler
    }
}

impl FrameDecoder for AudioDecoder {
    /// 送入一个包并取出它产生的所有帧，合并为一个 MediaFrame
    fn decode(&mut self, frame: &DecodableFrame) -> Option<MediaFrame> {
        let mut codec = self.codec.lock();
        if let Err(e) = codec.send_packet(&frame.packet) {
            debug!("音频包送入解码器失败（已跳过）: {}", e);
            return None;
        }

        let mut pcm = Vec::new();
        loop {
            match codec.receive_frame() {
                Received::Frame(RawFrame::Audio(raw)) => {
                    let Some(resampler) = self.resampler.as_mut() else {
                        continue;
                    };
                    if resampler.convert(&raw, &mut pcm).is_none() {
                        warn!("⚠ 音频帧重采样失败（已丢弃）");
                    }
                }
                Received::Frame(RawFrame::Video(_)) => {
                    warn!("⚠ 音频解码器产出了视频帧，忽略");
                }
                Received::NotReady => break,
                Received::Error(e) => {
                    warn!("音频解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        drop(codec);

        if pcm.is_empty() {
            return None;
        }
        let samples = pcm.len() / self.output.channels.max(1) as usize;
        let duration = MediaTime::new(samples as i64, self.output.sample_rate as i32);
        trace!("音频帧 pts={} 采样数={}", frame.pts, samples);

        Some(MediaFrame::new(
            MediaFrameType::Audio,
            DecodedSample::Audio(PcmSamples {
                sample_rate: self.output.sample_rate,
                channels: self.output.channels,
                data: pcm,
            }),
            frame.pts,
            duration,
        ))
    }

    fn setup(&mut self, stream: &StreamContext) {
        self.codec = stream.codec.clone();
        self.resampler = Self::resampler_for(stream, self.output);
    }
}

// ============= 视频 =============

/// 可呈现表面的分配器（平台像素缓冲由宿主提供）
pub trait SurfaceAllocator: Send + Sync {
    fn allocate(&self, width: u32, height: u32, format: PixelFormat) -> Option<PlanarImage>;
}

/// 默认的堆内存分配器，行跨度按 `alignment` 对齐
#[derive(Debug, Clone, Copy)]
pub struct HeapSurfaceAllocator {
    pub alignment: usize,
}

impl Default for HeapSurfaceAllocator {
    fn default() -> Self {
        Self { alignment: 64 }
    }
}

impl HeapSurfaceAllocator {
    fn align(&self, value: usize) -> usize {
        let a = self.alignment.max(1);
        value.div_ceil(a) * a
    }
}

impl SurfaceAllocator for HeapSurfaceAllocator {
    fn allocate(&self, width: u32, height: u32, format: PixelFormat) -> Option<PlanarImage> {
        if width == 0 || height == 0 {
            return None;
        }
        let w = width as usize;
        let h = height as usize;
        let chroma_rows = h.div_ceil(2);
        let mut planes = vec![
            Plane::zeroed(self.align(w), h),
            Plane::zeroed(self.align(w.div_ceil(2) * 2), chroma_rows),
        ];
        if format == PixelFormat::NV12A {
            planes.push(Plane::zeroed(self.align(w), h));
        }
        Some(PlanarImage {
            width,
            height,
            format,
            planes,
        })
    }
}

/// 视频解码器（硬件表面零拷贝，软件帧转 NV12/NV12A）
pub struct VideoDecoder {
    codec: CodecHandle,
    timebase: Rational,
    allocator: std::sync::Arc<dyn SurfaceAllocator>,
    /// UV 交错暂存区，仅在尺寸变化时重新分配
    uv_scratch: Vec<u8>,
    scratch_allocations: usize,
}

impl VideoDecoder {
    pub fn new(stream: &StreamContext, allocator: std::sync::Arc<dyn SurfaceAllocator>) -> Self {
        Self {
            codec: stream.codec.clone(),
            timebase: stream.timebase,
            allocator,
            uv_scratch: Vec::new(),
            scratch_allocations: 0,
        }
    }

    /// 暂存区重新分配的次数
    pub fn scratch_allocations(&self) -> usize {
        self.scratch_allocations
    }

    fn frame_pts(&self, raw_pts: Option<i64>, fallback: MediaTime) -> MediaTime {
        match raw_pts {
            Some(pts) if self.timebase.is_valid() => {
                MediaTime::new(pts * self.timebase.numerator as i64, self.timebase.denominator)
            }
            _ => fallback,
        }
    }

    fn convert(&mut self, raw: RawVideoFrame) -> Option<VideoImage> {
        match raw.format {
            RawPixelFormat::Hardware => match raw.hardware_surface {
                Some(surface) => Some(VideoImage::Hardware(surface)),
                None => {
                    warn!("⚠ 硬件帧缺少表面句柄，丢弃");
                    None
                }
            },
            RawPixelFormat::Yuva420p => self.copy_planar(&raw, PixelFormat::NV12A).map(VideoImage::Planar),
            RawPixelFormat::Yuv420p | RawPixelFormat::Other(_) => {
                self.copy_planar(&raw, PixelFormat::NV12).map(VideoImage::Planar)
            }
        }
    }

    fn copy_planar(&mut self, raw: &RawVideoFrame, format: PixelFormat) -> Option<PlanarImage> {
        let ls = &raw.line_sizes;
        if ls.len() < 3 || raw.planes.len() < 3 || ls[1] != ls[2] {
            warn!("⚠ 帧不是软件解码的 YUV 平面格式，丢弃");
            return None;
        }
        let height = raw.height as usize;
        let chroma_rows = height.div_ceil(2);
        let chroma_plane_size = ls[1] * chroma_rows;
        if raw.planes[0].len() < ls[0] * height
            || raw.planes[1].len() < chroma_plane_size
            || raw.planes[2].len() < chroma_plane_size
        {
            warn!("⚠ YUV 平面数据不足，丢弃");
            return None;
        }

        let uv_size = chroma_plane_size * 2;
        if self.uv_scratch.len() != uv_size {
            self.uv_scratch = vec![0u8; uv_size];
            self.scratch_allocations += 1;
        }
        for (i, (u, v)) in raw.planes[1][..chroma_plane_size]
            .iter()
            .zip(&raw.planes[2][..chroma_plane_size])
            .enumerate()
        {
            self.uv_scratch[2 * i] = *u;
            self.uv_scratch[2 * i + 1] = *v;
        }

        let mut image = self.allocator.allocate(raw.width, raw.height, format)?;
        if image.planes.len() < format.plane_count() {
            warn!("⚠ 分配的表面平面数不足");
            return None;
        }
        copy_plane(&mut image.planes[0], &raw.planes[0], ls[0], height);
        copy_plane(&mut image.planes[1], &self.uv_scratch, ls[1] * 2, chroma_rows);

        if format == PixelFormat::NV12A {
            match (raw.planes.get(3), ls.get(3)) {
                (Some(alpha), Some(&alpha_ls)) if alpha.len() >= alpha_ls * height => {
                    copy_plane(&mut image.planes[2], alpha, alpha_ls, height);
                }
                _ => {
                    warn!("⚠ YUVA 帧缺少 Alpha 平面");
                    return None;
                }
            }
        }
        Some(image)
    }
}

/// 按行拷贝；行跨度一致时整块拷贝
fn copy_plane(dst: &mut Plane, src: &[u8], src_stride: usize, rows: usize) {
    let rows = rows.min(dst.rows);
    if dst.stride == src_stride {
        let len = src_stride * rows;
        dst.data[..len].copy_from_slice(&src[..len]);
        return;
    }
    let row_bytes = src_stride.min(dst.stride);
    for y in 0..rows {
        let s = y * src_stride;
        let d = y * dst.stride;
        dst.data[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

impl FrameDecoder for VideoDecoder {
    /// 送入一个包，最多取出一帧
    fn decode(&mut self, frame: &DecodableFrame) -> Option<MediaFrame> {
        let received = {
            let mut codec = self.codec.lock();
            if let Err(e) = codec.send_packet(&frame.packet) {
                debug!("视频包送入解码器失败（已跳过）: {}", e);
                return None;
            }
            codec.receive_frame()
        };

        let raw = match received {
            Received::Frame(RawFrame::Video(raw)) => raw,
            Received::Frame(RawFrame::Audio(_)) => {
                warn!("⚠ 视频解码器产出了音频帧，忽略");
                return None;
            }
            Received::NotReady => {
                trace!("视频解码器需要更多数据（pts={}）", frame.pts);
                return None;
            }
            Received::Error(e) => {
                warn!("视频解码错误（已跳过）: {}", e);
                return None;
            }
        };

        let pts = self.frame_pts(raw.pts, frame.pts);
        let image = self.convert(raw)?;
        Some(MediaFrame::new(
            MediaFrameType::Video,
            DecodedSample::Video(image),
            pts,
            frame.duration,
        ))
    }

    fn setup(&mut self, stream: &StreamContext) {
        self.codec = stream.codec.clone();
        self.timebase = stream.timebase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Packet;
    use crate::player::testing::{audio_stream_context, raw_audio_i16, raw_yuv420p, video_stream_context, ScriptedCodec};

    fn decodable(frame_type: MediaFrameType, pts: MediaTime) -> DecodableFrame {
        DecodableFrame {
            frame_type,
            packet: Packet::default(),
            pts,
            dts: pts,
            duration: MediaTime::new(1, 30),
        }
    }

    #[test]
    fn audio_decoder_merges_every_frame_of_a_packet() {
        let codec = ScriptedCodec::new(vec![
            Received::Frame(RawFrame::Audio(raw_audio_i16(44100, 1, &[1000; 100]))),
            Received::Frame(RawFrame::Audio(raw_audio_i16(44100, 1, &[2000; 50]))),
            Received::NotReady,
        ]);
        let stream = audio_stream_context(codec);
        let mut decoder = AudioDecoder::new(&stream, AudioOutputFormat::default());

        let frame = decoder
            .decode(&decodable(MediaFrameType::Audio, MediaTime::new(3, 1)))
            .unwrap();
        assert_eq!(frame.position(), MediaTime::new(3, 1));
        let DecodedSample::Audio(pcm) = &frame.sample else { panic!("not audio") };
        assert_eq!(pcm.data.len(), 150);
        assert_eq!(frame.duration(), MediaTime::new(150, 44100));
    }

    #[test]
    fn audio_decoder_returns_none_when_codec_not_ready() {
        let stream = audio_stream_context(ScriptedCodec::new(vec![Received::NotReady]));
        let mut decoder = AudioDecoder::new(&stream, AudioOutputFormat::default());
        assert!(decoder
            .decode(&decodable(MediaFrameType::Audio, MediaTime::ZERO))
            .is_none());
    }

    #[test]
    fn audio_without_resampler_is_dropped() {
        let codec = ScriptedCodec::new(vec![
            Received::Frame(RawFrame::Audio(raw_audio_i16(44100, 1, &[1000; 100]))),
            Received::NotReady,
        ])
        .without_resampler();
        let stream = audio_stream_context(codec);
        let mut decoder = AudioDecoder::new(&stream, AudioOutputFormat::default());
        assert!(decoder
            .decode(&decodable(MediaFrameType::Audio, MediaTime::ZERO))
            .is_none());
    }

    #[test]
    fn frames_the_resampler_rejects_are_skipped() {
        // 48kHz 的帧与 44.1kHz 输出不匹配，直通重采样器拒绝；其余帧照常合并
        let codec = ScriptedCodec::new(vec![
            Received::Frame(RawFrame::Audio(raw_audio_i16(48000, 1, &[7; 64]))),
            Received::Frame(RawFrame::Audio(raw_audio_i16(44100, 1, &[9; 32]))),
            Received::NotReady,
        ]);
        let stream = audio_stream_context(codec);
        let mut decoder = AudioDecoder::new(&stream, AudioOutputFormat::default());
        let frame = decoder
            .decode(&decodable(MediaFrameType::Audio, MediaTime::ZERO))
            .unwrap();
        let DecodedSample::Audio(pcm) = &frame.sample else { panic!("not audio") };
        assert_eq!(pcm.data, vec![9; 32]);
    }

    #[test]
    fn setup_takes_the_resampler_of_the_new_codec() {
        let stream = audio_stream_context(ScriptedCodec::new(vec![]).without_resampler());
        let mut decoder = AudioDecoder::new(&stream, AudioOutputFormat::default());
        let next = audio_stream_context(ScriptedCodec::new(vec![
            Received::Frame(RawFrame::Audio(raw_audio_i16(44100, 1, &[3; 10]))),
            Received::NotReady,
        ]));
        decoder.setup(&next);
        assert!(decoder
            .decode(&decodable(MediaFrameType::Audio, MediaTime::ZERO))
            .is_some());
    }

    #[test]
    fn video_decoder_interleaves_chroma_and_respects_strides() {
        // 4x2 图像，源 Y 行跨度 8，色度行跨度 4
        let raw = raw_yuv420p(4, 2, 8, 4, 10, 20, 30);
        let codec = ScriptedCodec::new(vec![Received::Frame(RawFrame::Video(raw))]);
        let stream = video_stream_context(codec);
        let mut decoder = VideoDecoder::new(&stream, std::sync::Arc::new(HeapSurfaceAllocator { alignment: 16 }));

        let frame = decoder
            .decode(&decodable(MediaFrameType::Video, MediaTime::new(1, 1)))
            .unwrap();
        let DecodedSample::Video(VideoImage::Planar(image)) = &frame.sample else { panic!("not planar") };
        assert_eq!(image.format, PixelFormat::NV12);
        assert_eq!(image.planes[0].stride, 16);
        assert_eq!(&image.planes[0].row(1)[..8], &[10u8; 8]);
        assert_eq!(&image.planes[1].row(0)[..8], &[20, 30, 20, 30, 20, 30, 20, 30]);
        assert_eq!(decoder.scratch_allocations(), 1);
    }

    #[test]
    fn video_decoder_reuses_scratch_until_size_changes() {
        let codec = ScriptedCodec::new(vec![
            Received::Frame(RawFrame::Video(raw_yuv420p(4, 2, 4, 2, 1, 2, 3))),
            Received::Frame(RawFrame::Video(raw_yuv420p(4, 2, 4, 2, 1, 2, 3))),
            Received::Frame(RawFrame::Video(raw_yuv420p(8, 4, 8, 4, 1, 2, 3))),
        ]);
        let stream = video_stream_context(codec);
        let mut decoder = VideoDecoder::new(&stream, std::sync::Arc::new(HeapSurfaceAllocator::default()));
        for _ in 0..3 {
            assert!(decoder
                .decode(&decodable(MediaFrameType::Video, MediaTime::ZERO))
                .is_some());
        }
        assert_eq!(decoder.scratch_allocations(), 2);
    }

    #[test]
    fn video_decoder_rejects_mismatched_chroma_line_sizes() {
        let mut raw = raw_yuv420p(4, 2, 4, 2, 1, 2, 3);
        raw.line_sizes[2] = 3;
        let codec = ScriptedCodec::new(vec![Received::Frame(RawFrame::Video(raw))]);
        let stream = video_stream_context(codec);
        let mut decoder = VideoDecoder::new(&stream, std::sync::Arc::new(HeapSurfaceAllocator::default()));
        assert!(decoder
            .decode(&decodable(MediaFrameType::Video, MediaTime::ZERO))
            .is_none());
    }

    #[test]
    fn video_pts_comes_from_decoded_frame() {
        let mut raw = raw_yuv420p(4, 2, 4, 2, 1, 2, 3);
        raw.pts = Some(180_000);
        let codec = ScriptedCodec::new(vec![Received::Frame(RawFrame::Video(raw))]);
        let stream = video_stream_context(codec);
        let mut decoder = VideoDecoder::new(&stream, std::sync::Arc::new(HeapSurfaceAllocator::default()));
        let frame = decoder
            .decode(&decodable(MediaFrameType::Video, MediaTime::new(9, 1)))
            .unwrap();
        assert_eq!(frame.position(), MediaTime::new(2, 1));
    }
}
