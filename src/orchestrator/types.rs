use std::fmt;

use uuid::Uuid;

/// Logical name under which a linked client reaches its server.
pub const SERVER_LINK_ALIAS: &str = "solver";

/// Stages of a linked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkedState {
    Pending,
    ServerStarting,
    ServerStarted,
    ClientStarting,
    Success,
    CleanupInspecting,
    CleanupStopping,
    CleanupRemoving,
    Failed,
}

impl LinkedState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ServerStarting => "server-starting",
            Self::ServerStarted => "server-started",
            Self::ClientStarting => "client-starting",
            Self::Success => "success",
            Self::CleanupInspecting => "cleanup-inspecting",
            Self::CleanupStopping => "cleanup-stopping",
            Self::CleanupRemoving => "cleanup-removing",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: LinkedState) -> bool {
        use LinkedState::*;
        matches!(
            (self, next),
            (Pending, ServerStarting)
                | (ServerStarting, ServerStarted)
                | (ServerStarting, Failed)
                | (ServerStarted, ClientStarting)
                | (ServerStarted, CleanupInspecting)
                | (ClientStarting, Success)
                | (ClientStarting, CleanupInspecting)
                | (CleanupInspecting, CleanupStopping)
                | (CleanupStopping, CleanupRemoving)
                | (CleanupRemoving, Failed)
        )
    }
}

impl fmt::Display for LinkedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fresh network alias for a server that was not given a name.
pub fn generate_alias() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("srv-{}", &id[..10])
}

/// Link directive that makes `alias` reachable as [`SERVER_LINK_ALIAS`].
pub fn link_for(alias: &str) -> String {
    format!("{alias}:{SERVER_LINK_ALIAS}")
}
