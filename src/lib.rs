pub mod browser;
pub mod checkpoint;
pub mod comments;
pub mod config;
pub mod context;
pub mod db;
pub mod export;
pub mod extractor;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod task;
