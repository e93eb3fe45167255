pub mod cleanup;
pub mod worker;
pub mod writer;

pub use worker::{spawn_cleanup_ticker, spawn_log_worker, LogCommand};
pub use writer::LogWriter;
