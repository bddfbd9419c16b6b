pub mod buildfile;
pub mod canon;
pub mod context;
mod db;
pub mod densemap;
mod depfile;
pub mod error;
pub mod eval;
mod executor;
pub mod fs;
pub mod graph;
pub mod hash;
pub mod job;
pub mod parse;
pub mod process;
#[cfg(unix)]
mod process_posix;
#[cfg(windows)]
mod process_win;
pub mod progress;
mod reader;
pub mod run;
pub mod scanner;
pub mod scheduler;
pub mod target;
pub mod task;
mod thread_pool;
pub mod trace;

pub use error::{Error, Result};

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
