use std::path::PathBuf;
use std::time::Duration;

crate::config_group!({

    /// The maximum number of patch requests in flight at once.
    ///
    /// The default value is 10.
    ///
    /// Use the environment variable `CLUT_CLIENT_MAX_CONNECTIONS` to set this value.
    ref max_connections: usize = 10;

    /// User-Agent header sent with every patch request.
    ///
    /// Use the environment variable `CLUT_CLIENT_USER_AGENT` to set this value.
    ref user_agent: String = "FFXIV PATCH CLIENT".to_string();

    /// Delays slept before retrying the halves of a failed multi-range request, indexed by split depth.
    /// A failure past the end of this list is fatal.
    ///
    /// Use the environment variable `CLUT_CLIENT_BACKOFF_DELAYS` to set this value, e.g. `500ms,1s,2s`.
    ref backoff_delays: Vec<Duration> = [500, 1_000, 2_000, 3_000, 5_000, 10_000, 15_000, 20_000, 25_000, 30_000, 45_000, 60_000]
        .into_iter()
        .map(Duration::from_millis)
        .collect();

    /// Directory holding local copies of patch files named `<patch_name>.patch`.
    /// When a file exists there it is read instead of fetching from the network.
    ///
    /// Use the environment variable `CLUT_CLIENT_OVERRIDE_DIR` to set this value.
    ref override_dir: Option<PathBuf> = None;

    /// TCP connect timeout for patch requests.
    ///
    /// The default value is 30 seconds.
    ///
    /// Use the environment variable `CLUT_CLIENT_CONNECT_TIMEOUT` to set this value.
    ref connect_timeout: Duration = Duration::from_secs(30);
});
