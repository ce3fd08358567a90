pub mod job;
pub mod logging;
pub mod settings;
pub mod watermark;
