use crate::core::{
    log_ctx, CodecHandle, MediaFrameType, MediaTime, Rational, SourceOpenError, StreamContext, StreamKind,
    DEFAULT_TIMEBASE_DENOMINATOR,
};
use crate::player::demuxer_source::{Demuxer, ReadResult, SourceOpener, StreamInfo};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

struct SourceState {
    url: String,
    demuxer: Box<dyn Demuxer>,
    video: Option<StreamContext>,
    audio: Option<StreamContext>,
}

/// 媒体源 - 打开流地址，解析音视频轨道元数据，向解码器提供编解码器句柄
///
/// 内部状态由一把锁保护，`switch_stream` 成功时整体替换。
pub struct MediaSource {
    opener: Arc<dyn SourceOpener>,
    state: Mutex<SourceState>,
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MediaSource")
            .field("url", &state.url)
            .field("video", &state.video.as_ref().map(|c| c.index))
            .field("audio", &state.audio.as_ref().map(|c| c.index))
            .finish()
    }
}

impl MediaSource {
    pub fn open(url: &str, opener: Arc<dyn SourceOpener>) -> Result<Self, SourceOpenError> {
        let state = Self::open_state(url, opener.as_ref())?;
        Ok(Self {
            opener,
            state: Mutex::new(state),
        })
    }

    fn open_state(url: &str, opener: &dyn SourceOpener) -> Result<SourceState, SourceOpenError> {
        info!("{} 📂 打开媒体源: {}", log_ctx(), url);
        let mut demuxer = opener.open_input(url).map_err(|e| {
            warn!("{} ❌ 无法打开输入 {}: {}", log_ctx(), url, e);
            e
        })?;
        demuxer.find_stream_info().map_err(|e| {
            warn!("{} ❌ 无法读取流信息 {}: {}", log_ctx(), url, e);
            e
        })?;

        let streams = demuxer.streams();
        let video = Self::create_stream_context(demuxer.as_mut(), &streams, MediaFrameType::Video);
        let audio = Self::create_stream_context(demuxer.as_mut(), &streams, MediaFrameType::Audio);

        info!(
            "{} ✅ 媒体源就绪: {}（视频流: {:?}, 音频流: {:?}）",
            log_ctx(),
            demuxer.description(),
            video.as_ref().map(|c| c.index),
            audio.as_ref().map(|c| c.index)
        );

        Ok(SourceState {
            url: url.to_string(),
            demuxer,
            video,
            audio,
        })
    }

    /// 按顺序扫描该类型的流，跳过附加图片，取第一个能打开解码器的
    fn create_stream_context(
        demuxer: &mut dyn Demuxer,
        streams: &[StreamInfo],
        medium: MediaFrameType,
    ) -> Option<StreamContext> {
        for info in streams.iter().filter(|s| s.medium == Some(medium)) {
            if info.is_attached_picture {
                debug!("跳过附加图片流 #{}", info.index);
                continue;
            }

            let timebase = if info.timebase.is_valid() {
                info.timebase
            } else {
                Rational::new(1, DEFAULT_TIMEBASE_DENOMINATOR)
            };

            let Some(codec) = demuxer.open_codec(info.index) else {
                warn!("⚠ 流 #{} 的解码器无法打开，尝试下一个", info.index);
                continue;
            };

            let kind = match medium {
                MediaFrameType::Audio => StreamKind::Audio {
                    sample_rate: info.sample_rate,
                    channel_count: info.channels,
                },
                MediaFrameType::Video => StreamKind::Video,
            };
            let to_time = |ts: i64| MediaTime::new(ts * timebase.numerator as i64, timebase.denominator);

            return Some(StreamContext {
                index: info.index,
                fps: info.fps,
                timebase,
                duration: to_time(info.duration),
                start_time: to_time(info.start_time),
                codec: CodecHandle::new(codec),
                kind,
            });
        }
        None
    }

    /// 就地重新打开新地址；失败时保持原状态不变
    pub fn switch_stream(&self, url: &str) -> Result<(), SourceOpenError> {
        let new_state = Self::open_state(url, self.opener.as_ref())?;
        let mut state = self.state.lock();
        *state = new_state;
        info!("{} 🔀 媒体源已切换: {}", log_ctx(), url);
        Ok(())
    }

    /// 媒体时长：优先取音频流（时长为正时），否则取视频流
    pub fn media_duration(&self) -> Option<MediaTime> {
        let state = self.state.lock();
        let valid = |c: &StreamContext| c.duration.seconds() > 0.0;
        state
            .audio
            .as_ref()
            .filter(|c| valid(c))
            .or_else(|| state.video.as_ref().filter(|c| valid(c)))
            .map(|c| c.duration)
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    pub fn video_stream(&self) -> Option<StreamContext> {
        self.state.lock().video.clone()
    }

    pub fn audio_stream(&self) -> Option<StreamContext> {
        self.state.lock().audio.clone()
    }

    pub fn stream(&self, medium: MediaFrameType) -> Option<StreamContext> {
        match medium {
            MediaFrameType::Audio => self.audio_stream(),
            MediaFrameType::Video => self.video_stream(),
        }
    }

    pub fn read_packet(&self) -> ReadResult {
        self.state.lock().demuxer.read_packet()
    }

    pub fn seek(&self, stream_index: usize, timestamp: i64, keyframe_only: bool) -> bool {
        self.state.lock().demuxer.seek(stream_index, timestamp, keyframe_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::testing::{FakeOpener, FakeSource};

    #[test]
    fn picks_first_openable_stream_and_skips_attached_pictures() {
        let source = FakeSource::new()
            .with_attached_picture(0)
            .with_video(1, Rational::new(1, 90000), 900_000)
            .with_unopenable_video(2)
            .with_audio(3, Rational::new(1, 44100), 441_000);
        let opener = FakeOpener::single("http://a/master.m3u8", source);

        let media = MediaSource::open("http://a/master.m3u8", opener).unwrap();
        assert_eq!(media.video_stream().unwrap().index, 1);
        let audio = media.audio_stream().unwrap();
        assert_eq!(audio.index, 3);
        assert!(matches!(audio.kind, StreamKind::Audio { sample_rate: 44100, channel_count: 2 }));
    }

    #[test]
    fn duration_prefers_audio_when_positive() {
        let opener = FakeOpener::single(
            "u",
            FakeSource::new()
                .with_video(0, Rational::new(1, 90000), 900_000)
                .with_audio(1, Rational::new(1, 1000), 12_000),
        );
        let media = MediaSource::open("u", opener).unwrap();
        assert_eq!(media.media_duration().unwrap().seconds(), 12.0);

        let opener = FakeOpener::single(
            "u",
            FakeSource::new()
                .with_video(0, Rational::new(1, 90000), 900_000)
                .with_audio(1, Rational::new(1, 1000), 0),
        );
        let media = MediaSource::open("u", opener).unwrap();
        assert_eq!(media.media_duration().unwrap().seconds(), 10.0);
    }

    #[test]
    fn open_errors_are_typed() {
        let opener = FakeOpener::single("known", FakeSource::new());
        let err = MediaSource::open("missing", opener).err();
        assert_eq!(err, Some(SourceOpenError::CannotOpenInput));

        let opener = FakeOpener::single("broken", FakeSource::new().failing_stream_info());
        let err = MediaSource::open("broken", opener).err();
        assert_eq!(err, Some(SourceOpenError::CannotFindStreamInfo));
    }

    #[test]
    fn failed_switch_keeps_previous_streams() {
        let opener = FakeOpener::single(
            "low",
            FakeSource::new().with_video(0, Rational::new(1, 90000), 900_000),
        );
        let media = MediaSource::open("low", opener).unwrap();
        assert!(media.switch_stream("high").is_err());
        assert_eq!(media.url(), "low");
        assert!(media.video_stream().is_some());
    }

    #[test]
    fn debug_output_names_url_and_streams() {
        let opener = FakeOpener::single(
            "low",
            FakeSource::new().with_video(0, Rational::new(1, 90000), 900_000),
        );
        let media = MediaSource::open("low", opener).unwrap();
        let text = format!("{:?}", media);
        assert!(text.contains("\"low\""));
        assert!(text.contains("video: Some(0)"));
        assert!(text.contains("audio: None"));
    }
}
