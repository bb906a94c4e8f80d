pub mod macros;

mod clut_config;
pub mod groups;

pub use crate::clut_config::{ClutConfig, clut_config};
#[doc(hidden)]
pub use const_str;
#[doc(hidden)]
pub use konst;
// Used by the `config_group!` expansion.
pub use utils::configuration_utils::ParsableConfigValue;

pub type ReconstructionConfig = groups::reconstruction::ConfigValues;
pub type ClientConfig = groups::client::ConfigValues;
pub type SinkConfig = groups::sink::ConfigValues;
pub type LogConfig = groups::log::ConfigValues;
