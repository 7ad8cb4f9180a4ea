use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    ConfigReadFailed,
    StreamInterrupted,
    StreamTerminated,
    PublishRejected,
    LogUnavailable,
    PrototypeMissing,
    PrototypeCycle,
    PrototypeTooDeep,
    LookupFailed,
    InvalidTransition,
    RenameDisabled,
    UnknownItem,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::ConfigReadFailed => "E1002",
            Self::StreamInterrupted => "E2001",
            Self::StreamTerminated => "E2002",
            Self::PublishRejected => "E3001",
            Self::LogUnavailable => "E3002",
            Self::PrototypeMissing => "E4001",
            Self::PrototypeCycle => "E4002",
            Self::PrototypeTooDeep => "E4003",
            Self::LookupFailed => "E4004",
            Self::InvalidTransition => "E5001",
            Self::RenameDisabled => "E5002",
            Self::UnknownItem => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::ConfigReadFailed => "Config file could not be read",
            Self::StreamInterrupted => "Event stream interrupted, retry scheduled",
            Self::StreamTerminated => "Event stream terminated",
            Self::PublishRejected => "Publish rejected by the log",
            Self::LogUnavailable => "Log unavailable",
            Self::PrototypeMissing => "Prototype record not found",
            Self::PrototypeCycle => "Prototype chain contains a cycle",
            Self::PrototypeTooDeep => "Prototype chain too deep",
            Self::LookupFailed => "Record lookup failed",
            Self::InvalidTransition => "Invalid item state transition",
            Self::RenameDisabled => "Rename is not enabled",
            Self::UnknownItem => "Item not found",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .folio/config.toml and retry."),
            Self::ConfigReadFailed => Some("Check that the config file exists and is readable."),
            Self::StreamInterrupted => None,
            Self::StreamTerminated => {
                Some("Synchronization is paused. Restart the session once the log is reachable.")
            }
            Self::PublishRejected => {
                Some("The displayed name may be stale until the next update arrives.")
            }
            Self::LogUnavailable => Some("Retry once the log is reachable."),
            Self::PrototypeMissing => Some("Publish the prototype record or remove the reference."),
            Self::PrototypeCycle => Some("Break the cycle by editing one of the prototypes."),
            Self::PrototypeTooDeep => Some("Raise [resolve] max_depth or flatten the chain."),
            Self::LookupFailed => None,
            Self::InvalidTransition => {
                Some("Follow valid transitions: closed <-> open -> renaming -> open.")
            }
            Self::RenameDisabled => Some("Enable [rename] in the config or supply a rename handler."),
            Self::UnknownItem => Some("The item may have been removed; refresh the view."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
