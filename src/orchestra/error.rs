use std::{error::Error, fmt, io, time::Duration};

/// Where in the pipeline a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// Configuration, provider lookups and plan construction.
    Setup,
    /// A stage worker, by its position in the topology.
    Stage(usize),
    /// The driver itself, e.g. reading the backward channel.
    Driver,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Site::Setup => f.write_str("setup"),
            Site::Stage(index) => write!(f, "stage {index}"),
            Site::Driver => f.write_str("driver"),
        }
    }
}

/// The pipeline's result type.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// All errors that can occur while building or running the pipeline.
#[derive(Debug)]
pub enum PipelineError {
    /// Length mismatches, missing weight rows or unusable settings.
    InvalidConfiguration { site: Site, detail: String },
    /// A channel closed before its declared frame was delivered.
    TransportFault { site: Site, source: io::Error },
    /// A bounded wait expired.
    StallFault { site: Site, waited: Duration },
    /// The stage was stopped because another stage faulted first.
    Cancelled { site: Site },
    /// A unit task panicked instead of producing its output.
    UnitPanicked { stage: usize, unit: usize },
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl PipelineError {
    pub(crate) fn invalid(site: Site, detail: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            site,
            detail: detail.into(),
        }
    }

    /// Returns the site the error was raised at, if it has one.
    pub fn site(&self) -> Option<Site> {
        match self {
            Self::InvalidConfiguration { site, .. }
            | Self::TransportFault { site, .. }
            | Self::StallFault { site, .. }
            | Self::Cancelled { site } => Some(*site),
            Self::UnitPanicked { stage, .. } => Some(Site::Stage(*stage)),
            Self::Io(_) => None,
        }
    }

    /// Whether this error is only a consequence of a fault somewhere upstream.
    ///
    /// Cancellations and broken channels are what the rest of a pass sees once
    /// one stage has failed, so they never qualify as a root cause when a
    /// primary fault is also available.
    pub fn is_secondary(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TransportFault { .. })
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration { site, detail } => {
                write!(f, "invalid configuration at {site}: {detail}")
            }
            Self::TransportFault { site, source } => {
                write!(f, "transport fault at {site}: {source}")
            }
            Self::StallFault { site, waited } => {
                write!(f, "{site} stalled for {}ms", waited.as_millis())
            }
            Self::Cancelled { site } => write!(f, "{site} cancelled"),
            Self::UnitPanicked { stage, unit } => {
                write!(f, "unit {unit} of stage {stage} panicked")
            }
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::TransportFault { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<PipelineError> for io::Error {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
