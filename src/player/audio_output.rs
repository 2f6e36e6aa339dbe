use crate::core::{log_ctx, PlayerError, Result};
use crate::renderer::{AudioBuffer, AudioEngine, PlayedCallback};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 设备不支持请求格式时依次尝试的配置
const FALLBACK_CONFIGS: [(u32, u16); 6] = [(48000, 2), (44100, 2), (48000, 1), (44100, 1), (22050, 1), (22050, 2)];

/// 已调度、等待播放的缓冲
struct Scheduled {
    buffer: AudioBuffer,
    epoch: u64,
    on_played: Option<PlayedCallback>,
}

/// 控制线程与输出回调共享的状态
struct Shared {
    queue: SegQueue<Scheduled>,
    volume: AtomicU32,
    rate: AtomicU32,
    paused: AtomicBool,
    /// stop/reset 时递增，旧缓冲不再播放也不回调
    epoch: AtomicU64,
}

impl Shared {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    fn rate(&self) -> f32 {
        f32::from_bits(self.rate.load(Ordering::Relaxed))
    }

    fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

enum Command {
    Play(Sender<Result<()>>),
    Pause,
    Shutdown,
}

/// cpal 音频引擎
///
/// cpal 的 Stream 不能跨线程移动，所以由专用的 `audio-output` 线程创建并持有；
/// 其它线程通过命令通道控制它。缓冲播放完毕的回调也在该线程上执行，不占用实时音频回调。
pub struct CpalAudioEngine {
    shared: Arc<Shared>,
    command_tx: Sender<Command>,
    thread_handle: Option<JoinHandle<()>>,
    output: (u32, u16),
}

impl CpalAudioEngine {
    /// 打开默认输出设备（支持非标准配置自动回退）
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("{} 🔊 初始化音频输出: {} Hz, {} 声道", log_ctx(), sample_rate, channels);

        let shared = Arc::new(Shared {
            queue: SegQueue::new(),
            volume: AtomicU32::new(1.0f32.to_bits()),
            rate: AtomicU32::new(1.0f32.to_bits()),
            paused: AtomicBool::new(true),
            epoch: AtomicU64::new(0),
        });
        let (command_tx, command_rx) = unbounded::<Command>();
        let (ready_tx, ready_rx) = bounded::<Result<(u32, u16)>>(1);

        let thread_shared = shared.clone();
        let thread_handle = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let (stream, completion_rx, output) = match open_stream(sample_rate, channels, thread_shared) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(output));
                control_loop(stream, command_rx, completion_rx);
            })
            .map_err(|e| PlayerError::AudioError(format!("音频线程创建失败: {}", e)))?;

        let output = ready_rx
            .recv()
            .map_err(|_| PlayerError::AudioError("音频线程意外退出".to_string()))??;
        info!("{} ✅ 音频输出就绪: {} Hz, {} 声道", log_ctx(), output.0, output.1);

        Ok(Self {
            shared,
            command_tx,
            thread_handle: Some(thread_handle),
            output,
        })
    }

    /// 实际使用的输出格式 (采样率, 声道数)
    pub fn output_config(&self) -> (u32, u16) {
        self.output
    }

    /// 已调度但尚未播放完的缓冲数
    pub fn pending_buffers(&self) -> usize {
        self.shared.queue.len()
    }

    fn send(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            warn!("{} ⚠ 音频线程已退出，命令被丢弃", log_ctx());
        }
    }

    fn discard_scheduled(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = self.shared.drain();
        if dropped > 0 {
            debug!("丢弃已调度的音频缓冲 x{}", dropped);
        }
    }
}

impl AudioEngine for CpalAudioEngine {
    fn play(&self) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Command::Play(reply_tx));
        reply_rx
            .recv()
            .map_err(|_| PlayerError::AudioError("音频线程已退出".to_string()))??;
        self.shared.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        self.send(Command::Pause);
    }

    fn stop(&self) {
        self.pause();
        self.discard_scheduled();
    }

    fn reset(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        self.discard_scheduled();
        info!("{} 🔄 音频引擎已重置", log_ctx());
    }

    fn schedule(&self, buffer: AudioBuffer, on_played: PlayedCallback) {
        self.shared.queue.push(Scheduled {
            buffer,
            epoch: self.shared.epoch.load(Ordering::SeqCst),
            on_played: Some(on_played),
        });
    }

    fn set_rate(&self, rate: f32) {
        self.shared.rate.store(rate.max(0.0).to_bits(), Ordering::Relaxed);
    }

    fn set_volume(&self, volume: f32) {
        self.shared.volume.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Drop for CpalAudioEngine {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        info!("{} 🔇 音频输出已关闭", log_ctx());
    }
}

fn control_loop(stream: Stream, command_rx: Receiver<Command>, completion_rx: Receiver<PlayedCallback>) {
    loop {
        select! {
            recv(command_rx) -> command => match command {
                Ok(Command::Play(reply)) => {
                    let result = stream
                        .play()
                        .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)));
                    let _ = reply.send(result);
                }
                Ok(Command::Pause) => {
                    if let Err(e) = stream.pause() {
                        debug!("暂停音频流失败: {}", e);
                    }
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(completion_rx) -> callback => {
                if let Ok(callback) = callback {
                    callback();
                }
            }
        }
    }
    drop(stream);
    debug!("{} 🛑 音频线程退出", log_ctx());
}

fn open_stream(
    sample_rate: u32,
    channels: u16,
    shared: Arc<Shared>,
) -> Result<(Stream, Receiver<PlayedCallback>, (u32, u16))> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
    debug!("使用音频设备: {}", device.name().unwrap_or_default());

    let config = select_config(&device, sample_rate, channels)?;
    let output = (config.sample_rate.0, config.channels);
    let (completion_tx, completion_rx) = unbounded::<PlayedCallback>();
    let mut mixer = OutputMixer::new(shared, completion_tx, output.0, output.1);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.fill(data),
            move |err| error!("音频流错误: {}", err),
            None,
        )
        .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;
    Ok((stream, completion_rx, output))
}

/// 优先使用请求的格式，不支持时按 FALLBACK_CONFIGS 回退
fn select_config(device: &Device, sample_rate: u32, channels: u16) -> Result<StreamConfig> {
    let supported: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
        .collect();

    let candidates = std::iter::once((sample_rate, channels)).chain(FALLBACK_CONFIGS);
    for (rate, channel_count) in candidates {
        let config = StreamConfig {
            channels: channel_count,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };
        if supported.iter().any(|range| is_config_compatible(&config, range)) {
            if (rate, channel_count) != (sample_rate, channels) {
                warn!(
                    "⚠️  音频设备不支持 {} Hz, {} 声道，回退到 {} Hz, {} 声道",
                    sample_rate, channels, rate, channel_count
                );
            }
            return Ok(config);
        }
    }
    Err(PlayerError::AudioError(format!(
        "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
        sample_rate, channels
    )))
}

fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
    let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
        && config.sample_rate.0 <= supported.max_sample_rate().0;
    rate_in_range && config.channels == supported.channels()
}

/// 实时回调里的混音状态：按速率步进读取当前缓冲，声道按需复制/截取
struct OutputMixer {
    shared: Arc<Shared>,
    completion_tx: Sender<PlayedCallback>,
    sample_rate: u32,
    channels: u16,
    current: Option<Scheduled>,
    /// 当前缓冲内的读取位置（源帧，允许小数）
    cursor: f64,
}

impl OutputMixer {
    fn new(shared: Arc<Shared>, completion_tx: Sender<PlayedCallback>, sample_rate: u32, channels: u16) -> Self {
        Self {
            shared,
            completion_tx,
            sample_rate,
            channels,
            current: None,
            cursor: 0.0,
        }
    }

    fn fill(&mut self, data: &mut [f32]) {
        let out_channels = self.channels.max(1) as usize;
        if self.shared.paused.load(Ordering::Relaxed) {
            data.fill(0.0);
            return;
        }
        let volume = self.shared.volume();
        let rate = self.shared.rate() as f64;
        let epoch = self.shared.epoch.load(Ordering::Relaxed);

        for frame in data.chunks_mut(out_channels) {
            if !self.advance(epoch) {
                frame.fill(0.0);
                continue;
            }
            let Some(scheduled) = self.current.as_ref() else {
                frame.fill(0.0);
                continue;
            };
            let buffer = &scheduled.buffer;
            let in_channels = buffer.channels.max(1) as usize;
            let index = self.cursor as usize;
            for (channel, sample) in frame.iter_mut().enumerate() {
                let source_channel = channel.min(in_channels - 1);
                *sample = buffer
                    .samples
                    .get(index * in_channels + source_channel)
                    .copied()
                    .unwrap_or(0.0)
                    * volume;
            }
            self.cursor += rate * buffer.sample_rate as f64 / self.sample_rate as f64;
        }
    }

    /// 保证 current 是一个未读完的有效缓冲；读完的回调后切到下一个，过期的直接丢弃
    fn advance(&mut self, epoch: u64) -> bool {
        loop {
            let (stale, finished) = match &self.current {
                Some(current) => (
                    current.epoch != epoch,
                    self.cursor as usize >= current.buffer.frame_count(),
                ),
                None => (false, true),
            };
            if stale {
                self.current = None;
                continue;
            }
            if !finished {
                return true;
            }
            if let Some(mut done) = self.current.take() {
                if let Some(callback) = done.on_played.take() {
                    let _ = self.completion_tx.send(callback);
                }
            }
            let Some(next) = self.shared.queue.pop() else {
                return false;
            };
            if next.epoch == epoch {
                self.cursor = 0.0;
                self.current = Some(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MediaTime;
    use std::sync::atomic::AtomicUsize;

    fn shared() -> Arc<Shared> {
        Arc::new(Shared {
            queue: SegQueue::new(),
            volume: AtomicU32::new(1.0f32.to_bits()),
            rate: AtomicU32::new(1.0f32.to_bits()),
            paused: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        })
    }

    fn mono(samples: Vec<f32>, epoch: u64, played: &Arc<AtomicUsize>) -> Scheduled {
        let played = played.clone();
        Scheduled {
            buffer: AudioBuffer {
                samples,
                sample_rate: 44100,
                channels: 1,
                pts: MediaTime::ZERO,
            },
            epoch,
            on_played: Some(Box::new(move || {
                played.fetch_add(1, Ordering::SeqCst);
            })),
        }
    }

    #[test]
    fn mono_buffer_is_duplicated_to_stereo_and_reports_completion() {
        let shared = shared();
        let played = Arc::new(AtomicUsize::new(0));
        shared.queue.push(mono(vec![0.5, -0.5], 0, &played));
        shared.volume.store(0.5f32.to_bits(), Ordering::Relaxed);
        let (tx, rx) = unbounded();
        let mut mixer = OutputMixer::new(shared, tx, 44100, 2);

        let mut out = [1.0f32; 6];
        mixer.fill(&mut out);
        assert_eq!(out, [0.25, 0.25, -0.25, -0.25, 0.0, 0.0]);
        let callback = rx.try_recv().unwrap();
        callback();
        assert_eq!(played.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn paused_output_is_silent_and_keeps_buffers() {
        let shared = shared();
        let played = Arc::new(AtomicUsize::new(0));
        shared.queue.push(mono(vec![0.5; 4], 0, &played));
        shared.paused.store(true, Ordering::SeqCst);
        let (tx, rx) = unbounded();
        let mut mixer = OutputMixer::new(shared.clone(), tx, 44100, 1);

        let mut out = [1.0f32; 4];
        mixer.fill(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(shared.queue.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stale_buffers_are_dropped_without_callback() {
        let shared = shared();
        let played = Arc::new(AtomicUsize::new(0));
        shared.queue.push(mono(vec![0.5; 4], 0, &played));
        shared.epoch.store(1, Ordering::SeqCst);
        shared.queue.push(mono(vec![0.25; 2], 1, &played));
        let (tx, rx) = unbounded();
        let mut mixer = OutputMixer::new(shared, tx, 44100, 1);

        let mut out = [0.0f32; 2];
        mixer.fill(&mut out);
        assert_eq!(out, [0.25, 0.25]);
        assert!(rx.try_recv().is_err());
        mixer.fill(&mut out);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn double_rate_consumes_source_twice_as_fast() {
        let shared = shared();
        let played = Arc::new(AtomicUsize::new(0));
        shared.queue.push(mono(vec![0.1, 0.2, 0.3, 0.4], 0, &played));
        shared.rate.store(2.0f32.to_bits(), Ordering::Relaxed);
        let (tx, rx) = unbounded();
        let mut mixer = OutputMixer::new(shared, tx, 44100, 1);

        let mut out = [0.0f32; 3];
        mixer.fill(&mut out);
        assert_eq!(out, [0.1, 0.3, 0.0]);
        assert_eq!(rx.len(), 1);
    }
}
