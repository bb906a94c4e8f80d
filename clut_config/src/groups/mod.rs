pub mod client;
pub mod log;
pub mod reconstruction;
pub mod sink;
