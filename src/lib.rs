//! 自适应码率流媒体播放内核
//!
//! 数据流：媒体源 → 解码编排器 → 帧缓冲 → 渲染器 → 宿主呈现端。
//! 控制流反向：缓冲腾出空间触发补解码请求，渲染器缓冲状态驱动时钟暂停与画质降级。

pub mod core;
pub mod player;
pub mod renderer;

pub use crate::core::{PlayerConfig, PlayerError, Result};
pub use player::{PlaybackManager, PlayerCollaborators, PlayerEvent, PlayerItem};

/// 初始化日志（默认 Info 级别，可被 RUST_LOG 覆盖）
pub fn init_logger() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
