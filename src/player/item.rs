use crate::core::{log_ctx, NetworkCondition, PlayerError, Resolution, Result, Variant};
use crate::player::demuxer_source::SourceOpener;
use crate::player::media_source::MediaSource;
use crate::player::stream_manager::StreamManager;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// 清单解析器：主播放列表地址 → 码率变体列表
pub trait VariantResolver: Send + Sync {
    fn resolve(&self, url: &str) -> anyhow::Result<Vec<Variant>>;
}

/// 条目状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Unknown,
    ReadyToPlay,
    Failed(String),
}

/// 一次变体切换：从 `previous` 切到 `variant`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantChange {
    pub previous: Option<Variant>,
    pub variant: Variant,
}

struct ItemState {
    status: ItemStatus,
    preferred_peak_bit_rate: u64,
    streams: StreamManager,
    source: Option<Arc<MediaSource>>,
}

/// 播放条目 - 一个主播放列表地址及其变体选择
pub struct PlayerItem {
    url: String,
    resolver: Arc<dyn VariantResolver>,
    opener: Arc<dyn SourceOpener>,
    state: Mutex<ItemState>,
}

impl PlayerItem {
    pub fn new(url: impl Into<String>, resolver: Arc<dyn VariantResolver>, opener: Arc<dyn SourceOpener>) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            resolver,
            opener,
            state: Mutex::new(ItemState {
                status: ItemStatus::Unknown,
                preferred_peak_bit_rate: 0,
                streams: StreamManager::default(),
                source: None,
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn opener(&self) -> Arc<dyn SourceOpener> {
        self.opener.clone()
    }

    pub fn status(&self) -> ItemStatus {
        self.state.lock().status.clone()
    }

    pub fn media_source(&self) -> Option<Arc<MediaSource>> {
        self.state.lock().source.clone()
    }

    pub fn current_variant(&self) -> Option<Variant> {
        self.state.lock().streams.current().cloned()
    }

    pub fn variants(&self) -> Vec<Variant> {
        self.state.lock().streams.variants().to_vec()
    }

    pub fn presentation_size(&self) -> Resolution {
        self.state.lock().streams.presentation_size()
    }

    pub fn preferred_peak_bit_rate(&self) -> u64 {
        self.state.lock().preferred_peak_bit_rate
    }

    /// 未指定码率（0）时为自动画质
    pub fn prefers_auto_quality(&self) -> bool {
        self.preferred_peak_bit_rate() == 0
    }

    /// 解析清单、自动选档并打开对应的媒体源（阻塞，需在后台线程调用）
    ///
    /// 已就绪时直接返回已打开的媒体源。
    pub fn prepare(&self, condition: NetworkCondition, screen: Resolution) -> Result<Arc<MediaSource>> {
        if let Some(source) = self.media_source() {
            return Ok(source);
        }
        match self.open_optimal_source(condition, screen) {
            Ok(source) => {
                let mut state = self.state.lock();
                state.source = Some(source.clone());
                state.status = ItemStatus::ReadyToPlay;
                info!("{} ✅ 条目就绪: {}", log_ctx(), self.url);
                Ok(source)
            }
            Err(e) => {
                warn!("{} ❌ 条目准备失败 {}: {}", log_ctx(), self.url, e);
                self.state.lock().status = ItemStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn open_optimal_source(&self, condition: NetworkCondition, screen: Resolution) -> Result<Arc<MediaSource>> {
        let variants = self.resolver.resolve(&self.url)?;
        let variant = {
            let mut state = self.state.lock();
            state.streams.set_variants(variants);
            let variant = state
                .streams
                .optimal_auto(condition, screen)
                .ok_or(PlayerError::VariantUnavailable)?;
            state.streams.set_current(variant.clone());
            variant
        };
        let source = MediaSource::open(&variant.url, self.opener.clone())?;
        Ok(Arc::new(source))
    }

    /// 降一档；已是最低档时返回 None
    pub fn downgrade(&self) -> Option<VariantChange> {
        let mut state = self.state.lock();
        let variant = state.streams.downgraded()?;
        info!("{} 📉 降低画质 → {} bps", log_ctx(), variant.bandwidth);
        let previous = state.streams.current().cloned();
        state.streams.set_current(variant.clone());
        Some(VariantChange { previous, variant })
    }

    /// 设置首选峰值码率（0 = 自动），选中的变体与当前不同时返回切换
    pub fn set_preferred_peak_bit_rate(
        &self,
        bit_rate: u64,
        condition: NetworkCondition,
        screen: Resolution,
    ) -> Option<VariantChange> {
        let mut state = self.state.lock();
        state.preferred_peak_bit_rate = bit_rate;
        let selected = if bit_rate == 0 {
            state.streams.optimal_auto(condition, screen)
        } else {
            state.streams.optimal_for_bitrate(bit_rate)
        }?;
        let previous = state.streams.current().cloned();
        if previous.as_ref() == Some(&selected) {
            return None;
        }
        state.streams.set_current(selected.clone());
        Some(VariantChange {
            previous,
            variant: selected,
        })
    }

    /// 切换失败后恢复原来的变体
    pub fn restore_variant(&self, previous: Option<Variant>) {
        if let Some(variant) = previous {
            self.state.lock().streams.set_current(variant);
        }
    }

    /// 切换成功后记录新的媒体源
    pub fn replace_media_source(&self, source: Arc<MediaSource>) {
        self.state.lock().source = Some(source);
    }
}
