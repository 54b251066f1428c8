// Client-side defaults for the stream adapters.

pub(crate) const DEFAULT_STREAM_BUFFER: usize = 16;

/// Buffer depth for a stream endpoint. A positive request wins; zero falls
/// back to `WEIR_STREAM_BUFFER`, then to the built-in default.
pub(crate) fn stream_buffer(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    read_usize_env("WEIR_STREAM_BUFFER").unwrap_or(DEFAULT_STREAM_BUFFER)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}
