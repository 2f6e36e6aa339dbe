// 播放器核心模块

pub mod decoder;
pub mod demuxer_source;  // 解封装/编解码协作者接口
pub mod item;
pub mod manager;
pub mod media_decoder;   // 解封装 + 解码编排
pub mod media_source;
pub mod stream_manager;  // 码率变体选择

#[cfg(feature = "audio-output")]
pub mod audio_output;    // cpal 音频输出后端
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_backend;  // FFmpeg 解封装/解码后端

#[cfg(test)]
pub mod testing;

pub use decoder::{AudioDecoder, AudioOutputFormat, HeapSurfaceAllocator, SurfaceAllocator, VideoDecoder};
pub use demuxer_source::{Codec, Demuxer, SourceOpener, StreamInfo};
pub use item::{ItemStatus, PlayerItem, VariantChange, VariantResolver};
pub use manager::{should_downgrade, BufferSet, PlaybackManager, PlayerCollaborators, PlayerEvent};
pub use media_decoder::{DecodeTask, DecoderObserver, DecoderState, MediaDecoder, MediaDecoderConfig};
pub use media_source::MediaSource;
pub use stream_manager::{parse_master_playlist, StreamManager};

#[cfg(feature = "audio-output")]
pub use audio_output::CpalAudioEngine;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_backend::FfmpegOpener;
