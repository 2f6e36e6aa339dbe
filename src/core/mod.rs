// 核心数据结构、时钟、配置与并发原语

pub mod buffer;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod task_queue;
pub mod time;
pub mod types;

pub(crate) use dispatch::log_ctx;

pub use buffer::*;
pub use clock::*;
pub use config::*;
pub use dispatch::{SerialQueue, Timer};
pub use error::*;
pub use task_queue::*;
pub use time::*;
pub use types::*;
