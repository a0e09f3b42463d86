pub mod app;
pub mod call;
pub mod callrecord;
pub mod classifier;
pub mod config;
pub mod event;
pub mod handler;
pub mod twiml;
