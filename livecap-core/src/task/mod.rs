//! Durable post-processing task queue.
//!
//! Tasks are persisted in an embedded SQLite database and dispatched by the
//! [`QueueManager`] with bounded concurrency, priority ordering, dependency
//! edges, and crash recovery. The two built-in executors repair FLV files
//! and remux recordings to MP4; more can be registered by type.

mod executor_convert_mp4;
mod executor_fix_flv;
mod queue;
mod store;
mod types;

pub use executor_convert_mp4::ConvertMp4Executor;
pub use executor_fix_flv::FixFlvExecutor;
pub use queue::QueueManager;
pub use store::{TaskStore, APP_VERSION};
pub use types::{
    ProgressSender, QueueConfig, QueueStats, Task, TaskExecutor, TaskFilter, TaskStatus,
    TASK_TYPE_CONVERT_MP4, TASK_TYPE_FIX_FLV,
};
