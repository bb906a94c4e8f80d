use std::time::Duration;

use utils::ByteSize;

crate::config_group!({

    /// Number of attempts to open a target file before giving up.
    ///
    /// Use the environment variable `CLUT_SINK_OPEN_ATTEMPTS` to set this value.
    ref open_attempts: usize = 1;

    /// Delay between attempts to open a target file.
    ///
    /// Use the environment variable `CLUT_SINK_OPEN_RETRY_DELAY` to set this value.
    ref open_retry_delay: Duration = Duration::from_secs(1);

    /// Number of attempts of a positioned write that fails with a transient error.
    ///
    /// Use the environment variable `CLUT_SINK_WRITE_ATTEMPTS` to set this value.
    ref write_attempts: usize = 3;

    /// Delay between attempts of a positioned write.
    ///
    /// Use the environment variable `CLUT_SINK_WRITE_RETRY_DELAY` to set this value.
    ref write_retry_delay: Duration = Duration::from_millis(200);

    /// Target files kept open at once; the least recently used handle is closed past this.
    ///
    /// Use the environment variable `CLUT_SINK_MAX_OPEN_FILES` to set this value.
    ref max_open_files: usize = 256;

    /// Size of the zero buffer used when wiping a byte range of a target file.
    ///
    /// Use the environment variable `CLUT_SINK_WIPE_BUFFER_SIZE` to set this value.
    ref wipe_buffer_size: ByteSize = ByteSize::kb(64);
});
