// 渲染模块：解码帧 → 可呈现单元（PCM 缓冲 / 视频纹理），按共享时钟呈现

pub mod audio_renderer;
pub mod media_renderer;
pub mod video_renderer;

pub use audio_renderer::{AudioBuffer, AudioEngine, AudioRenderer, PlayedCallback};
pub use media_renderer::{MediaRenderer, MediaRendererDelegate};
pub use video_renderer::{PresentationTiming, VideoRenderer, VideoSink, VideoTexture};

use crate::core::{MediaFrameType, MediaTime};

/// 单个渲染器向协调者报告的事件
pub trait RendererObserver: Send + Sync {
    /// 就绪缓冲区占满（边沿触发，只在 未就绪 → 就绪 时回调）
    fn buffer_became_ready(&self, medium: MediaFrameType);

    /// 一个可呈现单元实际被呈现/播放完毕
    fn did_render(&self, medium: MediaFrameType, pts: MediaTime);

    /// 呈现端要数据时就绪缓冲区已经是空的
    ///
    /// `Emptied` 只在变空的那一次取出时触发，之后持续缺数据由这里报告。
    fn buffer_ran_dry(&self, medium: MediaFrameType);
}
