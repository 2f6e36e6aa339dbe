use crate::core::error::{PlayerError, Result};
use crate::core::types::Resolution;
use serde::{Deserialize, Serialize};

/// 一个条目播放结束后的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionAtItemEnd {
    /// 暂停在最后一帧（默认）
    Pause,
    /// 停止解码并拆除渲染
    Stop,
}

/// 由宿主探测得到的网络状况
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkCondition {
    Good,
    Moderate,
    Poor,
    Unknown,
}

impl NetworkCondition {
    /// 按往返延迟（毫秒）分级：≤500 良好，≤1500 一般，其余较差
    pub fn from_latency(latency_ms: f64) -> Self {
        if latency_ms.is_nan() || latency_ms < 0.0 {
            NetworkCondition::Unknown
        } else if latency_ms <= 500.0 {
            NetworkCondition::Good
        } else if latency_ms <= 1500.0 {
            NetworkCondition::Moderate
        } else {
            NetworkCondition::Poor
        }
    }
}

/// 播放内核配置
///
/// 所有字段都有默认值，可以只在 JSON 中写需要覆盖的部分。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    // ========== 缓冲容量 ==========
    /// 解码帧缓冲（音频/视频各一个）的最大容量
    pub frame_buffer_capacity: usize,
    /// 视频纹理缓冲最大容量（设置首选帧率后会改为 texture_capacity_at_fps）
    pub texture_buffer_capacity: usize,
    pub texture_capacity_at_fps: usize,
    /// PCM 缓冲最大容量
    pub pcm_buffer_capacity: usize,
    /// 音频引擎中保持调度的缓冲数量目标
    pub audio_schedule_target: usize,
    /// 首次播放时为每种媒体发起的解码请求数
    pub initial_decode_count: usize,

    // ========== 音频输出格式 ==========
    pub output_sample_rate: u32,
    pub output_channels: u16,

    // ========== 同步与 seek ==========
    /// 呈现判定的同步阈值（秒）
    pub sync_threshold: f64,
    /// Default seek 的有效容差（秒）
    pub seek_tolerance: f64,
    /// 结束判定的位置容差（秒）
    pub end_of_stream_tolerance: f64,
    /// 结束判定的去抖时长（秒）
    pub end_of_stream_debounce: f64,
    /// 缓冲检查间隔（秒）
    pub buffering_check_interval: f64,

    // ========== 自适应降级 ==========
    pub downgrade_min_buffering_count: u32,
    pub downgrade_min_buffering_ratio: f64,
    pub downgrade_max_position_ratio: f64,

    // ========== 速率/音量/帧率 ==========
    pub min_rate: f64,
    pub max_rate: f64,
    pub default_rate: f64,
    pub min_frame_rate: f64,
    pub max_frame_rate: f64,

    // ========== 其他 ==========
    /// 是否允许为视频启用硬件加速（受限环境下关闭）
    pub hardware_acceleration: bool,
    pub action_at_item_end: ActionAtItemEnd,
    /// 自动选档时参考的屏幕分辨率
    pub screen_resolution: Resolution,
    /// 自动选档时参考的网络状况
    pub network_condition: NetworkCondition,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            frame_buffer_capacity: 60,
            texture_buffer_capacity: 60,
            texture_capacity_at_fps: 10,
            pcm_buffer_capacity: 60,
            audio_schedule_target: 60,
            initial_decode_count: 30,
            output_sample_rate: 44100,
            output_channels: 1,
            sync_threshold: 0.1,
            seek_tolerance: 1.0,
            end_of_stream_tolerance: 0.1,
            end_of_stream_debounce: 0.1,
            buffering_check_interval: 1.0,
            downgrade_min_buffering_count: 5,
            downgrade_min_buffering_ratio: 0.3,
            downgrade_max_position_ratio: 0.9,
            min_rate: 0.2,
            max_rate: 2.5,
            default_rate: 1.0,
            min_frame_rate: 30.0,
            max_frame_rate: 90.0,
            hardware_acceleration: true,
            action_at_item_end: ActionAtItemEnd::Pause,
            screen_resolution: Resolution::FULL_HD_1080P,
            network_condition: NetworkCondition::Unknown,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文本加载并校验
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("frame_buffer_capacity", self.frame_buffer_capacity),
            ("texture_buffer_capacity", self.texture_buffer_capacity),
            ("texture_capacity_at_fps", self.texture_capacity_at_fps),
            ("pcm_buffer_capacity", self.pcm_buffer_capacity),
            ("audio_schedule_target", self.audio_schedule_target),
            ("initial_decode_count", self.initial_decode_count),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(PlayerError::InvalidConfig(format!("{} 不能为 0", name)));
            }
        }

        if self.output_sample_rate == 0 || self.output_channels == 0 {
            return Err(PlayerError::InvalidConfig("音频输出格式无效".into()));
        }
        if self.min_rate <= 0.0 || self.min_rate > self.max_rate {
            return Err(PlayerError::InvalidConfig(format!(
                "速率范围无效: [{}, {}]",
                self.min_rate, self.max_rate
            )));
        }
        if self.default_rate < self.min_rate || self.default_rate > self.max_rate {
            return Err(PlayerError::InvalidConfig(format!(
                "默认速率 {} 超出范围",
                self.default_rate
            )));
        }
        if self.min_frame_rate <= 0.0 || self.min_frame_rate > self.max_frame_rate {
            return Err(PlayerError::InvalidConfig(format!(
                "帧率范围无效: [{}, {}]",
                self.min_frame_rate, self.max_frame_rate
            )));
        }
        let durations = [
            ("sync_threshold", self.sync_threshold),
            ("seek_tolerance", self.seek_tolerance),
            ("end_of_stream_tolerance", self.end_of_stream_tolerance),
            ("end_of_stream_debounce", self.end_of_stream_debounce),
            ("buffering_check_interval", self.buffering_check_interval),
        ];
        for (name, value) in durations {
            if !(value > 0.0) {
                return Err(PlayerError::InvalidConfig(format!("{} 必须为正数", name)));
            }
        }
        Ok(())
    }

    pub fn clamp_rate(&self, rate: f64) -> f64 {
        rate.clamp(self.min_rate, self.max_rate)
    }

    /// 视频目标帧率 = clamp(源帧率 × 速率, [min, max])
    pub fn clamp_frame_rate(&self, source_fps: f64, rate: f64) -> f64 {
        (source_fps * rate).clamp(self.min_frame_rate, self.max_frame_rate)
    }
}
