use std::sync::Arc;

/// Error type shared between every caller of a single flight.
pub type SharedError = Arc<anyhow::Error>;

/// Options represents the options for a singleflight group
#[derive(Clone, Debug)]
pub struct Options {
    /// Name of the group. default is "singleflight"
    /// recorded on every span and used as the prefix of worker thread names.
    pub name: String,
    /// Workers is the initial number of threads running `do_chan` work. default is 8
    /// the pool is only started on the first `do_chan` call, and grows
    /// whenever every thread is busy so no flight waits for a worker.
    pub workers: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: "singleflight".to_owned(),
            workers: 8,
        }
    }
}

/// Outcome holds the results of a flight, so they can be passed on a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome<V, E> {
    /// What the work returned, identical for every caller of the flight.
    pub result: Result<V, E>,
    /// Whether the result was given to multiple callers.
    pub shared: bool,
}

impl<V, E> Outcome<V, E> {
    pub fn into_result(self) -> Result<V, E> {
        self.result
    }
}
