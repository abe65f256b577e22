use std::error;
use std::io;

use thiserror::Error;

pub type Cause = Box<dyn error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Routing socket unreachable, closed mid-read, or past its deadline
    #[error("routing socket error: {context}")]
    Connection {
        context: String,
        #[source]
        cause: Option<io::Error>,
    },
    /// Listing addresses, links, routes or neighbors failed
    #[error("kernel query failed: {context}")]
    KernelQuery {
        context: String,
        #[source]
        cause: Cause,
    },
    /// No VXLAN link could be resolved for a subnet
    #[error("resolution failed: {context}")]
    Resolution {
        context: String,
        #[source]
        cause: Option<Cause>,
    },
    /// A single FDB append or delete failed
    #[error("fdb mutation failed: {context}")]
    Mutation {
        context: String,
        #[source]
        cause: Cause,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Process setup: runtime, signal handlers
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        cause: io::Error,
    },
}

impl Error {
    pub fn connection<C: ToString>(context: C) -> Self {
        Error::Connection {
            context: context.to_string(),
            cause: None,
        }
    }

    pub fn connection_io<C: ToString>(context: C, cause: io::Error) -> Self {
        Error::Connection {
            context: context.to_string(),
            cause: Some(cause),
        }
    }

    pub fn kernel_query<C, E>(context: C, cause: E) -> Self
    where
        C: ToString,
        E: Into<Cause>,
    {
        Error::KernelQuery {
            context: context.to_string(),
            cause: cause.into(),
        }
    }

    pub fn resolution<C: ToString>(context: C) -> Self {
        Error::Resolution {
            context: context.to_string(),
            cause: None,
        }
    }

    pub fn resolution_from<C, E>(context: C, cause: E) -> Self
    where
        C: ToString,
        E: Into<Cause>,
    {
        Error::Resolution {
            context: context.to_string(),
            cause: Some(cause.into()),
        }
    }

    pub fn mutation<C, E>(context: C, cause: E) -> Self
    where
        C: ToString,
        E: Into<Cause>,
    {
        Error::Mutation {
            context: context.to_string(),
            cause: cause.into(),
        }
    }

    pub fn io<C: ToString>(context: C, cause: io::Error) -> Self {
        Error::Io {
            context: context.to_string(),
            cause,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }
}
