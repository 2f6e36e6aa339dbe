use crate::core::types::BufferState;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Weak;

/// 缓冲区在管线中的角色，观察者据此区分事件来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    VideoFrames,
    AudioFrames,
    Textures,
    Pcm,
}

impl BufferRole {
    pub fn label(&self) -> &'static str {
        match self {
            BufferRole::VideoFrames => "视频帧",
            BufferRole::AudioFrames => "音频帧",
            BufferRole::Textures => "纹理",
            BufferRole::Pcm => "PCM",
        }
    }
}

/// 缓冲区通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    /// 有新元素写入
    ItemsAdded,
    /// 占用量达到上限
    Filled,
    /// 占用量低于上限且减少，携带可用空间
    Freed(usize),
    /// 一次取出使缓冲区从非空变为空（含溢出队列）
    Emptied,
}

/// 缓冲区事件观察者
///
/// 回调在执行修改的线程上同步触发（锁已释放），观察者应尽快把工作转交给自己的队列。
pub trait BufferObserver: Send + Sync {
    fn on_buffer_event(&self, role: BufferRole, event: BufferEvent);
}

struct BufferInner<T> {
    items: VecDeque<T>,
    /// 超出上限的写入暂存于此，取出时补位
    overflow: VecDeque<T>,
    max_size: usize,
}

impl<T> BufferInner<T> {
    fn promote_overflow(&mut self) {
        while self.items.len() < self.max_size {
            match self.overflow.pop_front() {
                Some(item) => self.items.push_back(item),
                None => break,
            }
        }
    }
}

/// 有界缓冲区 - 解码帧、纹理、PCM 共用的线程安全队列
///
/// 占用量永远不超过 `max_size`；超出部分进入溢出队列，等待消费者取走后补位，
/// 写入方永远不会被阻塞。
pub struct BoundedBuffer<T> {
    role: BufferRole,
    inner: Mutex<BufferInner<T>>,
    observers: Mutex<Vec<Weak<dyn BufferObserver>>>,
}

impl<T> BoundedBuffer<T> {
    pub fn new(role: BufferRole, max_size: usize) -> Self {
        Self {
            role,
            inner: Mutex::new(BufferInner {
                items: VecDeque::with_capacity(max_size),
                overflow: VecDeque::new(),
                max_size,
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    /// 注册观察者（弱引用，观察者释放后自动移除）
    pub fn subscribe(&self, observer: Weak<dyn BufferObserver>) {
        self.observers.lock().push(observer);
    }

    pub fn add(&self, item: T) {
        self.add_items(std::iter::once(item));
    }

    pub fn add_items<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut events = Vec::with_capacity(2);
        {
            let mut inner = self.inner.lock();
            let old = inner.items.len();
            let mut accepted = 0usize;
            for item in items {
                accepted += 1;
                if inner.items.len() < inner.max_size && inner.overflow.is_empty() {
                    inner.items.push_back(item);
                } else {
                    inner.overflow.push_back(item);
                }
            }
            if accepted == 0 {
                return;
            }
            let new = inner.items.len();
            trace!(
                "{} 缓冲区写入 {} 项: {} -> {} (溢出 {})",
                self.role.label(),
                accepted,
                old,
                new,
                inner.overflow.len()
            );
            events.push(BufferEvent::ItemsAdded);
            if old < inner.max_size && new >= inner.max_size {
                events.push(BufferEvent::Filled);
            }
        }
        self.notify(&events);
    }

    /// 取出一项
    pub fn take(&self) -> Option<T> {
        self.take_items(1).and_then(|mut items| items.pop())
    }

    /// 最多取出 `count` 项；`count == 0` 返回 None 且无任何副作用
    pub fn take_items(&self, count: usize) -> Option<Vec<T>> {
        if count == 0 {
            return None;
        }
        let mut events = Vec::with_capacity(2);
        let taken = {
            let mut inner = self.inner.lock();
            let old = inner.items.len();
            let n = count.min(old);
            let taken: Vec<T> = inner.items.drain(..n).collect();
            inner.promote_overflow();
            let new = inner.items.len();
            if new < inner.max_size && old > new {
                events.push(BufferEvent::Freed(inner.max_size - new));
            }
            if old > 0 && new == 0 {
                events.push(BufferEvent::Emptied);
            }
            taken
        };
        self.notify(&events);
        Some(taken)
    }

    /// 丢弃全部内容（含溢出），不触发任何通知
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.items.len() + inner.overflow.len();
        inner.items.clear();
        inner.overflow.clear();
        debug!("🧹 {} 缓冲区已清空（丢弃 {} 项）", self.role.label(), dropped);
    }

    /// 调整上限；缩小时多余的尾部元素退回溢出队列
    pub fn set_max_size(&self, max_size: usize) {
        let mut inner = self.inner.lock();
        inner.max_size = max_size;
        while inner.items.len() > max_size {
            if let Some(item) = inner.items.pop_back() {
                inner.overflow.push_front(item);
            }
        }
        inner.promote_overflow();
    }

    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    /// 有界区占用量，永远不超过上限（不含溢出队列）
    pub fn occupancy(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// 溢出队列中等待补位的数量
    pub fn overflow_len(&self) -> usize {
        self.inner.lock().overflow.len()
    }

    /// 缓冲区中的全部元素数（占用量 + 溢出量），与 `is_empty` 一致
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.items.len() + inner.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.items.is_empty() && inner.overflow.is_empty()
    }

    pub fn state(&self) -> BufferState {
        let inner = self.inner.lock();
        if inner.items.len() >= inner.max_size {
            BufferState::Full
        } else {
            BufferState::NeedCount(inner.max_size - inner.items.len())
        }
    }

    fn notify(&self, events: &[BufferEvent]) {
        if events.is_empty() {
            return;
        }
        let observers: Vec<_> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(|o| o.upgrade()).collect()
        };
        for event in events {
            for observer in &observers {
                observer.on_buffer_event(self.role, *event);
            }
        }
    }
}

impl<T: Clone> BoundedBuffer<T> {
    /// 队首元素（不取出）
    pub fn first(&self) -> Option<T> {
        self.inner.lock().items.front().cloned()
    }
}
