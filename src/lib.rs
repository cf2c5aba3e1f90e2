pub mod app;
pub mod callrecord;
pub mod classifier;
pub mod config;
pub mod correlation;
pub mod dashboard;
pub mod handler;
pub mod insights;
pub mod scope;
pub mod sync;
pub mod telephony;
pub mod version;
pub mod webhook;
