//! NSM wire error taxonomy.
//!
//! Every `/error` reply carries one of these codes as its second
//! argument. The negative ladder follows the NSM protocol; `SaveFailed`
//! continues it for manifest-write failures.

/// Error codes carried in `/error` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    General,
    IncompatibleApi,
    Blacklisted,
    LaunchFailed,
    NoSuchFile,
    NoSessionOpen,
    UnsavedChanges,
    NotNow,
    BadProject,
    CreateFailed,
    SessionLocked,
    OperationPending,
    SaveFailed,
}

impl ErrorCode {
    /// The integer value sent on the wire.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::General => -1,
            Self::IncompatibleApi => -2,
            Self::Blacklisted => -3,
            Self::LaunchFailed => -4,
            Self::NoSuchFile => -5,
            Self::NoSessionOpen => -6,
            Self::UnsavedChanges => -7,
            Self::NotNow => -8,
            Self::BadProject => -9,
            Self::CreateFailed => -10,
            Self::SessionLocked => -11,
            Self::OperationPending => -12,
            Self::SaveFailed => -13,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::General => "general",
            Self::IncompatibleApi => "incompatible_api",
            Self::Blacklisted => "blacklisted",
            Self::LaunchFailed => "launch_failed",
            Self::NoSuchFile => "no_such_file",
            Self::NoSessionOpen => "no_session_open",
            Self::UnsavedChanges => "unsaved_changes",
            Self::NotNow => "not_now",
            Self::BadProject => "bad_project",
            Self::CreateFailed => "create_failed",
            Self::SessionLocked => "session_locked",
            Self::OperationPending => "operation_pending",
            Self::SaveFailed => "save_failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_follow_the_protocol_ladder() {
        assert_eq!(ErrorCode::Ok.value(), 0);
        assert_eq!(ErrorCode::General.value(), -1);
        assert_eq!(ErrorCode::IncompatibleApi.value(), -2);
        assert_eq!(ErrorCode::CreateFailed.value(), -10);
        assert_eq!(ErrorCode::SessionLocked.value(), -11);
        assert_eq!(ErrorCode::OperationPending.value(), -12);
        assert_eq!(ErrorCode::SaveFailed.value(), -13);
    }

    #[test]
    fn display_matches_taxonomy_names() {
        assert_eq!(ErrorCode::OperationPending.to_string(), "operation_pending");
        assert_eq!(ErrorCode::SessionLocked.to_string(), "session_locked");
    }
}
