use crate::host::AgentId;
use crate::military::squad::SquadId;
use crate::raid::RaidId;
use thiserror::Error;

/// Internal failure taxonomy. None of these ever reach the host: scheduled
/// tasks turn them into "cancel" or "try again next period".
#[derive(Debug, Error)]
pub enum RaidError {
    /// The search budget ran out before the goal was reached.
    #[error("no path found within search budget")]
    NoPath,

    #[error("agent {0} is gone")]
    AgentGone(AgentId),

    #[error("squad {0} is gone")]
    SquadGone(SquadId),

    #[error("raid {0} is not active")]
    RaidInactive(RaidId),

    /// The settlement provider had nothing useful for this settlement.
    #[error("no geometry for settlement '{0}'")]
    MissingGeometry(String),

    #[error("no valid destination found")]
    NoDestination,

    #[error("block change at {0} was refused")]
    PermissionDenied(glam::IVec3),

    #[error("codec failure: {0}")]
    Codec(String),
}

impl RaidError {
    /// Whether the subject of the failing operation no longer exists, in which
    /// case the owning task should cancel itself instead of retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RaidError::AgentGone(_) | RaidError::SquadGone(_) | RaidError::RaidInactive(_))
    }
}

impl From<String> for RaidError {
    fn from(value: String) -> Self {
        RaidError::Codec(value)
    }
}

pub type RaidResult<T> = Result<T, RaidError>;
