use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring, running or persisting a simulation.
///
/// Every reported error is fatal to the run that raised it. Near-zero separations between
/// particles are not errors: kernels recover from them locally.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing bounds, counts or parameters. Raised before any thread starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The dump file or an initial state source could not be opened, read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The first write failure of the persistence writer, reported at shutdown.
    #[error("failed to persist snapshot of step {step}: {source}")]
    Persistence {
        /// Step index of the snapshot that could not be written.
        step: u64,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The persistence writer thread panicked.
    #[error("persistence writer thread panicked")]
    WriterPanicked,

    /// A step was requested from an engine that has already been stopped.
    #[error("simulation engine is stopped")]
    EngineStopped,

    /// The force evaluation thread pool could not be built.
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A configuration file could not be parsed.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for [`Error::Configuration`].
    #[inline]
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_informative() {
        let e = Error::config("particle count must be > 0");
        let msg = e.to_string();
        assert!(msg.contains("invalid configuration"));
        assert!(msg.contains("particle count"));

        let e = Error::Persistence {
            step: 7,
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        let msg = e.to_string();
        assert!(msg.contains("step 7"));
        assert!(msg.contains("disk full"));
    }
}
