use thiserror::Error;

/// A machine endpoint that cannot be turned into an event socket URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("endpoint is empty")]
    Empty,

    #[error("unsupported endpoint scheme in {0:?} (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
}

/// An inbound frame that is not a structured event.
///
/// Carries the raw text so callers can log or count it before dropping it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed frame: {reason}")]
pub struct MalformedFrame {
    pub raw: String,
    pub reason: String,
}

impl MalformedFrame {
    pub fn new(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("machine {0} is already being watched")]
    DuplicateMachine(String),

    #[error("machine {0} is not being watched")]
    UnknownMachine(String),

    #[error("invalid endpoint for machine {machine}: {source}")]
    Endpoint {
        machine: String,
        #[source]
        source: EndpointError,
    },
}
