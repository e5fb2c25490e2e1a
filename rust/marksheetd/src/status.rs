use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarksheetStatus {
    Draft,
    Published,
    Finalized,
}

impl MarksheetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MarksheetStatus::Draft => "draft",
            MarksheetStatus::Published => "published",
            MarksheetStatus::Finalized => "finalized",
        }
    }

    /// Case-insensitive; front ends send both "Draft" and "draft".
    pub fn parse(s: &str) -> Option<MarksheetStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(MarksheetStatus::Draft),
            "published" => Some(MarksheetStatus::Published),
            "finalized" => Some(MarksheetStatus::Finalized),
            _ => None,
        }
    }

    /// Students only ever see sheets that left draft.
    pub fn visible_to_student(self) -> bool {
        self != MarksheetStatus::Draft
    }
}

impl std::fmt::Display for MarksheetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Edit,
    Delete,
    Publish,
    Finalize,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Publish => "publish",
            Action::Finalize => "finalize",
        }
    }
}

/// The two actions that move a sheet forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Publish,
    Finalize,
}

impl Transition {
    pub fn action(self) -> Action {
        match self {
            Transition::Publish => Action::Publish,
            Transition::Finalize => Action::Finalize,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.action().as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("cannot {} a {from} marksheet", .action.as_str())]
    IllegalTransition {
        from: MarksheetStatus,
        action: Action,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_publish: bool,
    pub can_finalize: bool,
}

/// The one permission table. Every caller (IPC gating, storage checks)
/// goes through here.
pub fn permissions(status: MarksheetStatus) -> Permissions {
    match status {
        MarksheetStatus::Draft => Permissions {
            can_edit: true,
            can_delete: true,
            can_publish: true,
            can_finalize: false,
        },
        MarksheetStatus::Published => Permissions {
            can_edit: false,
            can_delete: false,
            can_publish: false,
            can_finalize: true,
        },
        MarksheetStatus::Finalized => Permissions {
            can_edit: false,
            can_delete: false,
            can_publish: false,
            can_finalize: false,
        },
    }
}

pub fn is_allowed(status: MarksheetStatus, action: Action) -> bool {
    let p = permissions(status);
    match action {
        Action::Edit => p.can_edit,
        Action::Delete => p.can_delete,
        Action::Publish => p.can_publish,
        Action::Finalize => p.can_finalize,
    }
}

pub fn check(status: MarksheetStatus, action: Action) -> Result<(), StatusError> {
    if is_allowed(status, action) {
        Ok(())
    } else {
        Err(StatusError::IllegalTransition {
            from: status,
            action,
        })
    }
}

/// Target status of a transition action. Edit and delete leave the status
/// as it is.
pub fn apply(status: MarksheetStatus, action: Action) -> Result<MarksheetStatus, StatusError> {
    check(status, action)?;
    Ok(match action {
        Action::Publish => MarksheetStatus::Published,
        Action::Finalize => MarksheetStatus::Finalized,
        Action::Edit | Action::Delete => status,
    })
}

pub fn publish(status: MarksheetStatus) -> Result<MarksheetStatus, StatusError> {
    apply(status, Action::Publish)
}

pub fn finalize(status: MarksheetStatus) -> Result<MarksheetStatus, StatusError> {
    apply(status, Action::Finalize)
}
