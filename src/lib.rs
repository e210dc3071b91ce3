pub mod config;
pub mod dataset;
pub mod duck;
pub mod error;
pub mod pipeline;
pub mod ports;
pub mod process;
pub mod stages;
pub mod storage;
