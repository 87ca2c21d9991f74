//! HTTP-controlled synthetic CPU and memory load.
//!
//! [`CpuController`] keeps a chosen number of cores busy and
//! [`MemoryController`] grows a resident allocation up to a limit. Each one
//! runs at most one task at a time and joins its workers on stop. The
//! [`handlers`] module exposes both over actix-web.

pub mod config;
pub mod cpu_stress;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod memory_stress;
pub mod stop_signal;
pub mod sys_info;

mod lifecycle;

pub use cpu_stress::{CpuController, CpuSettings};
pub use memory_stress::{MemoryController, MemorySettings};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
