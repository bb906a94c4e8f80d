pub mod byte_size;
pub use byte_size::ByteSize;

pub mod configuration_utils;
pub use configuration_utils::ParsableConfigValue;

pub mod logging;
pub use logging::{LogFormat, init_logging};
