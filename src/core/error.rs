use thiserror::Error;

/// 打开媒体源时的失败原因
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOpenError {
    #[error("无法打开输入")]
    CannotOpenInput,

    #[error("无法读取流信息")]
    CannotFindStreamInfo,
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("媒体源打开失败: {0}")]
    SourceOpen(#[from] SourceOpenError),

    #[error("没有可用的码率变体")]
    VariantUnavailable,

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("格式转换错误: {0}")]
    ConversionError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("配置解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
