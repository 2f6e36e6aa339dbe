use crossbeam_channel::{after, bounded, select, tick, unbounded, Receiver, Sender};
use log::{debug, warn};
use std::process;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// 串行队列命令
enum QueueCommand {
    Run(Job),
    Stop,
}

/// 串行工作队列 - 单独线程按提交顺序执行任务
///
/// 解码、音频缓冲、视频缓冲各持有一个，跨队列通信只走缓冲区和任务队列。
pub struct SerialQueue {
    label: String,
    command_tx: Sender<QueueCommand>,
    thread_handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl SerialQueue {
    pub fn new(label: &str) -> Self {
        let (command_tx, command_rx) = unbounded::<QueueCommand>();
        let thread_label = label.to_string();
        let thread_handle = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || Self::run_loop(&thread_label, command_rx));

        match thread_handle {
            Ok(handle) => {
                let thread_id = handle.thread().id();
                Self {
                    label: label.to_string(),
                    command_tx,
                    thread_handle: Some(handle),
                    thread_id,
                }
            }
            Err(e) => {
                // 线程创建失败时退化为调用方线程执行（见 dispatch）
                warn!("{} ⚠ 串行队列 {} 线程创建失败: {}", log_ctx(), label, e);
                Self {
                    label: label.to_string(),
                    command_tx,
                    thread_handle: None,
                    thread_id: thread::current().id(),
                }
            }
        }
    }

    fn run_loop(label: &str, command_rx: Receiver<QueueCommand>) {
        debug!("{} 🧵 串行队列 {} 启动", log_ctx(), label);
        while let Ok(command) = command_rx.recv() {
            match command {
                QueueCommand::Run(job) => job(),
                QueueCommand::Stop => break,
            }
        }
        debug!("{} 🛑 串行队列 {} 退出", log_ctx(), label);
    }

    /// 异步提交任务
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.thread_handle.is_none() {
            job();
            return;
        }
        if let Err(e) = self.command_tx.send(QueueCommand::Run(Box::new(job))) {
            warn!("{} ⚠ 串行队列 {} 已停止，任务被丢弃: {}", log_ctx(), self.label, e);
        }
    }

    /// 当前线程是否就是队列线程
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// 阻塞等待此前提交的任务全部执行完（在队列线程上调用时立即返回）
    pub fn wait_idle(&self) {
        if self.is_current() || self.thread_handle.is_none() {
            return;
        }
        let (done_tx, done_rx) = bounded::<()>(1);
        self.dispatch(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stop(&mut self) {
        let _ = self.command_tx.send(QueueCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // 在自身线程上停止：只发命令，不能 join 自己
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

/// 定时器 - 一次性（去抖）或周期性；drop 即取消
pub struct Timer {
    cancel_tx: Option<Sender<()>>,
}

impl Timer {
    /// `delay` 之后执行一次
    pub fn once<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let spawned = thread::Builder::new()
            .name("timer-once".into())
            .spawn(move || {
                select! {
                    recv(cancel_rx) -> _ => {}
                    recv(after(delay)) -> _ => callback(),
                }
            });
        if let Err(e) = spawned {
            warn!("{} ⚠ 定时器线程创建失败: {}", log_ctx(), e);
        }
        Self {
            cancel_tx: Some(cancel_tx),
        }
    }

    /// 每隔 `interval` 执行一次，直到取消
    pub fn repeating<F>(interval: Duration, callback: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let spawned = thread::Builder::new()
            .name("timer-repeat".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(cancel_rx) -> _ => break,
                        recv(ticker) -> _ => callback(),
                    }
                }
            });
        if let Err(e) = spawned {
            warn!("{} ⚠ 定时器线程创建失败: {}", log_ctx(), e);
        }
        Self {
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn cancel(&mut self) {
        // drop 发送端即可让 select! 的 cancel 分支返回
        if self.cancel_tx.take().is_some() {
            debug!("{} ⏱ 定时器已取消", log_ctx());
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel_tx.take();
    }
}
