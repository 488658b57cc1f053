pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod publisher;
pub mod queue;
pub mod sandbox;
pub mod storage;
pub mod worker;
