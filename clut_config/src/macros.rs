/// Declares a configuration group: a `ConfigValueGroup` struct holding the listed values with their defaults.
///
/// Usage:
/// ```rust
/// mod sample {
///     clut_config::config_group!({
///         ref queue_depth: usize = 16;
///         ref label: String = "default".to_string();
///     });
/// }
///
/// let group = sample::ConfigValueGroup::new();
/// assert_eq!(group.queue_depth, 16);
/// ```
///
/// The group name is the last segment of the invoking module's path. Calling `apply_env_overrides()` reads
/// `CLUT_<GROUP>_<FIELD>` for every field, so `queue_depth` in module `sample` is read from
/// `CLUT_SAMPLE_QUEUE_DEPTH`.
#[macro_export]
macro_rules! config_group {
    ({
        $(
            $(#[$meta:meta])*
            ref $name:ident : $type:ty = $value:expr;
        )+
    }) => {
        #[allow(unused_imports)]
        use $crate::ParsableConfigValue;

        /// Values of this configuration group.
        #[derive(Debug, Clone)]
        pub struct ConfigValueGroup {
            $(
                $(#[$meta])*
                pub $name: $type,
            )+
        }

        impl Default for ConfigValueGroup {
            fn default() -> Self {
                Self {
                    $(
                        $name: {
                            let v: $type = $value;
                            v
                        },
                    )+
                }
            }
        }

        impl AsRef<ConfigValueGroup> for ConfigValueGroup {
            fn as_ref(&self) -> &ConfigValueGroup {
                self
            }
        }

        impl ConfigValueGroup {
            /// Defaults only; the environment is not consulted.
            pub fn new() -> Self {
                Self::default()
            }

            /// Reads each field from its `CLUT_<GROUP>_<FIELD>` environment variable, falling back to the declared default.
            pub fn apply_env_overrides(&mut self) {
                $(
                    {
                        const ENV_VAR_NAME: &str = $crate::const_str::concat!(
                            "CLUT_",
                            $crate::const_str::convert_ascii_case!(upper, $crate::konst::string::rsplit_once(module_path!(), "::").unwrap().1),
                            "_",
                            $crate::const_str::convert_ascii_case!(upper, stringify!($name)));

                        let maybe_env_value = std::env::var(ENV_VAR_NAME).ok();
                        let default_value: $type = $value;
                        self.$name = <$type>::parse(ENV_VAR_NAME, maybe_env_value, default_value);
                    }
                )+
            }
        }

        pub(crate) type ConfigValues = ConfigValueGroup;
    };
}
