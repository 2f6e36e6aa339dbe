use parking_lot::Mutex;
use std::collections::VecDeque;

/// 有序单消费者任务队列
///
/// `enqueue` 在队列从空变为非空时返回 true，调用方据此启动一次消费循环。
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// 入队；返回是否发生了 空 → 非空 的转换
    pub fn enqueue(&self, item: T) -> bool {
        let mut items = self.items.lock();
        items.push_back(item);
        items.len() == 1
    }

    pub fn dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn reset(&self) {
        self.items.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// 对所有排队任务求和（流量控制用）
    pub fn sum_by<F>(&self, f: F) -> usize
    where
        F: Fn(&T) -> usize,
    {
        self.items.lock().iter().map(f).sum()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 渲染器的缓冲任务：从上游拉取 `count` 帧并转换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferingTask {
    pub count: usize,
}
