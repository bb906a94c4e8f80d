use std::time::Duration;

use utils::ByteSize;

crate::config_group!({

    /// The maximum serialized length of a single `Range` request header.
    /// Merged ranges are packed into one request until adding another would exceed this.
    ///
    /// The default value is 4096 bytes.
    ///
    /// Use the environment variable `CLUT_RECONSTRUCTION_MAX_RANGE_HEADER_SIZE` to set this value.
    ref max_range_header_size: usize = 4096;

    /// Blob ranges of the same patch closer together than this many bytes are fetched as one range.
    ///
    /// The default value is 512 bytes.
    ///
    /// Use the environment variable `CLUT_RECONSTRUCTION_MIN_RANGE_DISTANCE` to set this value.
    ref min_range_distance: u64 = 512;

    /// Upper bound on the size of one merged range. A merged range is buffered whole before its
    /// intervals are handed to the apply workers, so this bounds memory per part.
    ///
    /// The default value is 16MB.
    ///
    /// Use the environment variable `CLUT_RECONSTRUCTION_MAX_MERGED_RANGE_SIZE` to set this value.
    ref max_merged_range_size: ByteSize = ByteSize::mb(16);

    /// Capacity of the queue between fetch tasks and apply workers.
    ///
    /// The default value is 16.
    ///
    /// Use the environment variable `CLUT_RECONSTRUCTION_APPLY_QUEUE_CAPACITY` to set this value.
    ref apply_queue_capacity: usize = 16;

    /// The number of intervals applied to the sink concurrently.
    ///
    /// The default value is the available parallelism of the machine.
    ///
    /// Use the environment variable `CLUT_RECONSTRUCTION_APPLY_CONCURRENCY` to set this value.
    ref apply_concurrency: usize = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);

    /// How long the apply loop waits for fetch progress before logging and checking again.
    ///
    /// The default value is 5 seconds.
    ///
    /// Use the environment variable `CLUT_RECONSTRUCTION_PRODUCER_WAIT_TIMEOUT` to set this value.
    ref producer_wait_timeout: Duration = Duration::from_secs(5);
});
