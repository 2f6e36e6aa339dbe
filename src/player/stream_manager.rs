use crate::core::{log_ctx, NetworkCondition, Resolution, Variant};
use anyhow::Context;
use log::{debug, info};
use std::path::PathBuf;
use url::Url;

/// 码率变体管理器 - 在清单给出的变体列表中排序、过滤、选择
///
/// 只负责选择，不做网络请求；清单由外部解析器提供。
#[derive(Debug, Clone, Default)]
pub struct StreamManager {
    variants: Vec<Variant>,
    current: Option<Variant>,
}

impl StreamManager {
    pub fn new(variants: Vec<Variant>) -> Self {
        Self {
            variants,
            current: None,
        }
    }

    pub fn set_variants(&mut self, variants: Vec<Variant>) {
        info!("{} 📋 可用码率变体: {} 个", log_ctx(), variants.len());
        self.variants = variants;
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn current(&self) -> Option<&Variant> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, variant: Variant) {
        debug!("当前变体: {} bps {}x{}", variant.bandwidth, variant.resolution.width, variant.resolution.height);
        self.current = Some(variant);
    }

    /// 当前变体的画面尺寸，没有当前变体时为 0x0
    pub fn presentation_size(&self) -> Resolution {
        self.current.as_ref().map(|v| v.resolution).unwrap_or(Resolution::new(0, 0))
    }

    fn sorted_by_bandwidth(&self) -> Vec<Variant> {
        let mut sorted = self.variants.clone();
        sorted.sort_by_key(|v| v.bandwidth);
        sorted
    }

    /// 比当前变体低一档的变体；已是最低档或没有当前变体时返回 None
    pub fn downgraded(&self) -> Option<Variant> {
        let current = self.current.as_ref()?;
        let mut sorted = self.sorted_by_bandwidth();
        sorted.reverse();
        let index = sorted.iter().position(|v| v == current)?;
        sorted.get(index + 1).cloned()
    }

    /// 码率最接近 `bitrate` 的变体（相同差值取码率较低者）
    pub fn optimal_for_bitrate(&self, bitrate: u64) -> Option<Variant> {
        self.sorted_by_bandwidth()
            .into_iter()
            .min_by_key(|v| v.bandwidth.abs_diff(bitrate))
    }

    /// 像素面积最接近屏幕的变体
    pub fn optimal_resolution(&self, screen: Resolution) -> Option<Variant> {
        self.variants
            .iter()
            .min_by_key(|v| v.resolution.area().abs_diff(screen.area()))
            .cloned()
    }

    /// 按网络状况与屏幕分辨率自动选择
    ///
    /// 候选为按码率升序、且在任一朝向下不超过屏幕的变体（没有则取全部）：
    /// - 良好：像素面积最接近屏幕
    /// - 一般：第一个 ≥720p 的，没有则取中间档
    /// - 较差/未知：最低档
    pub fn optimal_auto(&self, condition: NetworkCondition, screen: Resolution) -> Option<Variant> {
        let sorted = self.sorted_by_bandwidth();
        if sorted.is_empty() {
            return None;
        }
        let fitting: Vec<Variant> = sorted
            .iter()
            .filter(|v| fits_screen(v.resolution, screen))
            .cloned()
            .collect();
        let candidates = if fitting.is_empty() { sorted } else { fitting };

        let selected = match condition {
            NetworkCondition::Good => self.optimal_resolution(screen),
            NetworkCondition::Moderate => candidates
                .iter()
                .find(|v| v.resolution.height >= Resolution::HD_720P.height)
                .or_else(|| candidates.get(candidates.len() / 2))
                .cloned(),
            NetworkCondition::Poor | NetworkCondition::Unknown => candidates.first().cloned(),
        };
        debug!("自动选档（{:?}）: {:?}", condition, selected.as_ref().map(|v| v.bandwidth));
        selected
    }
}

fn fits_screen(resolution: Resolution, screen: Resolution) -> bool {
    let landscape = resolution.width <= screen.width && resolution.height <= screen.height;
    let portrait = resolution.width <= screen.height && resolution.height <= screen.width;
    landscape || portrait
}

/// 清单地址：http(s) 直接解析，其余按本地路径转为 file:// 地址
fn playlist_base(playlist_url: &str) -> anyhow::Result<Url> {
    if playlist_url.starts_with("http://") || playlist_url.starts_with("https://") {
        return Url::parse(playlist_url).context("无效的清单地址");
    }
    let path = PathBuf::from(playlist_url);
    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()?.join(path)
    };
    Url::from_file_path(&absolute).ok().context("无效的清单路径")
}

fn resolve_uri(base: &Url, value: &str) -> std::result::Result<Url, url::ParseError> {
    if let Ok(url) = Url::parse(value) {
        return Ok(url);
    }
    base.join(value)
}

/// 解析主播放列表，相对地址按清单地址补全
///
/// 缺少 RESOLUTION 的条目记为 0x0；`#EXT-X-I-FRAME-STREAM-INF` 条目不参与选档。
pub fn parse_master_playlist(playlist: &str, playlist_url: &str) -> anyhow::Result<Vec<Variant>> {
    let master = m3u8_rs::parse_master_playlist_res(playlist.as_bytes())
        .map_err(|e| anyhow::anyhow!("主播放列表解析失败: {:?}", e))?;
    let base = playlist_base(playlist_url)?;

    let mut variants = Vec::with_capacity(master.variants.len());
    for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
        let url = resolve_uri(&base, &variant.uri).with_context(|| format!("无效的变体地址: {}", variant.uri))?;
        let resolution = variant
            .resolution
            .map(|r| Resolution::new(r.width as u32, r.height as u32))
            .unwrap_or(Resolution::new(0, 0));
        variants.push(Variant::new(variant.bandwidth, resolution, url.to_string()));
    }
    debug!("主播放列表解析完成: {} 个变体", variants.len());
    Ok(variants)
}
