use crate::token::CorrelationToken;

/// The data-less discriminant of a [`SessionEvent`], handy for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    /// The session is up.
    ConnectSucceeded,

    /// The session could not be established.
    ConnectFailed,

    /// A guaranteed message was spooled by the broker.
    OperationAcknowledged,

    /// A guaranteed message was refused by the broker.
    OperationRejected,

    /// A provision request completed.
    ProvisionSucceeded,

    /// A provision request failed.
    ProvisionFailed,

    /// A subscription was added.
    SubscribeSucceeded,

    /// A subscription could not be added.
    SubscribeFailed,

    /// Any other session notice.
    Notice,
}

/// An event reported by the broker on a session's event stream.
///
/// Events that complete a request carry the request's correlation token, if
/// the broker echoed one. Failure events carry the broker's diagnostic text
/// when it supplied any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is up.
    ConnectSucceeded,

    /// The session could not be established.
    ConnectFailed {
        /// Diagnostic text from the broker.
        info: Option<String>,
    },

    /// A guaranteed message was spooled by the broker.
    OperationAcknowledged {
        /// The token attached to the message when it was sent.
        token: Option<CorrelationToken>,
    },

    /// A guaranteed message was refused by the broker.
    OperationRejected {
        /// The token attached to the message when it was sent.
        token: Option<CorrelationToken>,
        /// Diagnostic text from the broker.
        info: Option<String>,
    },

    /// A provision request completed.
    ProvisionSucceeded {
        /// The token passed with the provision request.
        token: Option<CorrelationToken>,
    },

    /// A provision request failed.
    ProvisionFailed {
        /// The token passed with the provision request.
        token: Option<CorrelationToken>,
        /// Diagnostic text from the broker.
        info: Option<String>,
    },

    /// A subscription was added.
    SubscribeSucceeded {
        /// The token passed with the subscribe request.
        token: Option<CorrelationToken>,
    },

    /// A subscription could not be added.
    SubscribeFailed {
        /// The token passed with the subscribe request.
        token: Option<CorrelationToken>,
        /// Diagnostic text from the broker.
        info: Option<String>,
    },

    /// Any other session notice (reconnecting, keep-alive, down).
    Notice {
        /// Description of the notice.
        info: String,
    },
}

impl SessionEvent {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> SessionEventKind {
        match self {
            Self::ConnectSucceeded => SessionEventKind::ConnectSucceeded,
            Self::ConnectFailed { .. } => SessionEventKind::ConnectFailed,
            Self::OperationAcknowledged { .. } => SessionEventKind::OperationAcknowledged,
            Self::OperationRejected { .. } => SessionEventKind::OperationRejected,
            Self::ProvisionSucceeded { .. } => SessionEventKind::ProvisionSucceeded,
            Self::ProvisionFailed { .. } => SessionEventKind::ProvisionFailed,
            Self::SubscribeSucceeded { .. } => SessionEventKind::SubscribeSucceeded,
            Self::SubscribeFailed { .. } => SessionEventKind::SubscribeFailed,
            Self::Notice { .. } => SessionEventKind::Notice,
        }
    }

    /// Returns the correlation token carried by this event, if any.
    #[must_use]
    pub const fn token(&self) -> Option<CorrelationToken> {
        match self {
            Self::OperationAcknowledged { token }
            | Self::OperationRejected { token, .. }
            | Self::ProvisionSucceeded { token }
            | Self::ProvisionFailed { token, .. }
            | Self::SubscribeSucceeded { token }
            | Self::SubscribeFailed { token, .. } => *token,
            Self::ConnectSucceeded | Self::ConnectFailed { .. } | Self::Notice { .. } => None,
        }
    }

    /// Returns the diagnostic text carried by this event, if any.
    #[must_use]
    pub fn info(&self) -> Option<&str> {
        match self {
            Self::ConnectFailed { info }
            | Self::OperationRejected { info, .. }
            | Self::ProvisionFailed { info, .. }
            | Self::SubscribeFailed { info, .. } => info.as_deref(),
            Self::Notice { info } => Some(info),
            Self::ConnectSucceeded
            | Self::OperationAcknowledged { .. }
            | Self::ProvisionSucceeded { .. }
            | Self::SubscribeSucceeded { .. } => None,
        }
    }
}
