crate::config_group!({

    /// Default log level, used when `RUST_LOG` is not set.
    ///
    /// Use the environment variable `CLUT_LOG_LEVEL` to set this value.
    ref level: String = "info".to_string();

    /// Log output format, `text` or `json`.
    ///
    /// Use the environment variable `CLUT_LOG_FORMAT` to set this value.
    ref format: String = "text".to_string();
});
