//! Impls - ready-made implementations of the ports.
//!
//! # 含まれる実装
//! - **RecordBuffer**: RecordSink の前段で records をバッチにまとめる
//! - **CollectingReporter**: failure を保持する (テスト・診断用)
//! - **ChannelReporter**: failure を mpsc channel に流す

pub mod record_buffer;
pub mod reporters;

pub use self::record_buffer::{RecordBuffer, DEFAULT_FLUSH_THRESHOLD};
pub use self::reporters::{ChannelReporter, CollectingReporter};
