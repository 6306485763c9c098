//! Access decisions and their HTTP status mapping.

use super::VerifierError;
use crate::discord::GuildSummary;
use serde::Serialize;

/// Why access was not granted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessErrorKind {
    NoToken,
    SessionExpired,
    Upstream,
    /// 2xx from Discord with a body that did not parse
    InvalidResponse,
    Transport,
    Storage,
    /// Guild absent from the user's guild list
    NotFound,
    /// Guild listed, but neither owner nor any moderator bit
    MissingPermissions,
}

impl AccessErrorKind {
    /// Boundary status for this failure.
    ///
    /// `NotFound` is 403 rather than 404 so a caller cannot discover which guild
    /// ids exist.
    pub fn http_status(self) -> u16 {
        match self {
            AccessErrorKind::NoToken | AccessErrorKind::SessionExpired => 401,
            AccessErrorKind::NotFound | AccessErrorKind::MissingPermissions => 403,
            AccessErrorKind::Upstream
            | AccessErrorKind::InvalidResponse
            | AccessErrorKind::Transport => 502,
            AccessErrorKind::Storage => 500,
        }
    }

    /// True when the user has to go through the OAuth login again.
    pub fn requires_reauthentication(self) -> bool {
        matches!(self, AccessErrorKind::NoToken | AccessErrorKind::SessionExpired)
    }
}

impl From<&VerifierError> for AccessErrorKind {
    fn from(err: &VerifierError) -> Self {
        match err {
            VerifierError::NoToken => AccessErrorKind::NoToken,
            VerifierError::SessionExpired => AccessErrorKind::SessionExpired,
            VerifierError::Upstream { .. } => AccessErrorKind::Upstream,
            VerifierError::InvalidResponse { .. } => AccessErrorKind::InvalidResponse,
            VerifierError::Transport(_) => AccessErrorKind::Transport,
            VerifierError::Storage(_) => AccessErrorKind::Storage,
        }
    }
}

/// Result of checking one user against one guild. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AccessDecision {
    pub has_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild: Option<GuildSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<AccessErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Discord's status when `error_kind` is `Upstream`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

impl AccessDecision {
    pub fn granted(guild: GuildSummary) -> Self {
        Self {
            has_access: true,
            guild: Some(guild),
            error_kind: None,
            http_status: None,
            upstream_status: None,
        }
    }

    pub fn denied(kind: AccessErrorKind) -> Self {
        Self {
            has_access: false,
            guild: None,
            error_kind: Some(kind),
            http_status: Some(kind.http_status()),
            upstream_status: None,
        }
    }

    pub fn from_error(err: &VerifierError) -> Self {
        let mut decision = Self::denied(AccessErrorKind::from(err));
        if let VerifierError::Upstream { status } = err {
            decision.upstream_status = Some(*status);
        }
        decision
    }
}
