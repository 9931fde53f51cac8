//! The Downloader contract and one concrete implementation.

pub mod contract;
pub mod http;

pub use contract::{Downloader, ProgressSink};
pub use http::HttpDownloader;
