//! Which task actions a caller may take, derived only from the task's status
//! and the caller's relationship to it.

use std::{collections::BTreeSet, fmt};

use shared::domain::{Address, Task, TaskStatus};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskAction {
    Apply,
    Assign,
    Start,
    SubmitWork,
    Complete,
    Cancel,
    Dispute,
}

impl TaskAction {
    pub const ALL: [TaskAction; 7] = [
        TaskAction::Apply,
        TaskAction::Assign,
        TaskAction::Start,
        TaskAction::SubmitWork,
        TaskAction::Complete,
        TaskAction::Cancel,
        TaskAction::Dispute,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TaskAction::Apply => "apply",
            TaskAction::Assign => "assign",
            TaskAction::Start => "start",
            TaskAction::SubmitWork => "submit work",
            TaskAction::Complete => "complete",
            TaskAction::Cancel => "cancel",
            TaskAction::Dispute => "dispute",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The caller's relationship to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    AssignedFreelancer,
    Other,
}

impl Role {
    pub fn of(task: &Task, caller: &Address) -> Self {
        if task.is_client(caller) {
            Role::Client
        } else if task.is_assigned_freelancer(caller) {
            Role::AssignedFreelancer
        } else {
            Role::Other
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot {action} a task that is {status}")]
    InvalidTransition {
        action: TaskAction,
        status: TaskStatus,
    },
    #[error("only the {required} may {action} this task")]
    NotPermitted {
        action: TaskAction,
        required: &'static str,
    },
    #[error("{0} has already submitted a proposal")]
    AlreadyProposed(Address),
    #[error("{0} has not submitted a proposal for this task")]
    NoProposal(Address),
}

pub fn legal_actions(task: &Task, caller: &Address) -> BTreeSet<TaskAction> {
    TaskAction::ALL
        .into_iter()
        .filter(|action| ensure_allowed(task, caller, *action).is_ok())
        .collect()
}

/// Refuses `action` unless the current status and the caller's role permit
/// it.
pub fn ensure_allowed(
    task: &Task,
    caller: &Address,
    action: TaskAction,
) -> Result<(), LifecycleError> {
    let role = Role::of(task, caller);
    let invalid = || LifecycleError::InvalidTransition {
        action,
        status: task.status,
    };
    let requires = |required: Role, label: &'static str| {
        if role == required {
            Ok(())
        } else {
            Err(LifecycleError::NotPermitted {
                action,
                required: label,
            })
        }
    };

    match action {
        TaskAction::Apply => {
            if task.status != TaskStatus::Open || task.assigned_freelancer.is_some() {
                return Err(invalid());
            }
            if role == Role::Client {
                return Err(LifecycleError::NotPermitted {
                    action,
                    required: "freelancer",
                });
            }
            if task.proposal_from(caller).is_some() {
                return Err(LifecycleError::AlreadyProposed(caller.clone()));
            }
            Ok(())
        }
        TaskAction::Assign => {
            if task.status != TaskStatus::Open {
                return Err(invalid());
            }
            requires(Role::Client, "client")
        }
        TaskAction::Start => {
            if task.status != TaskStatus::Assigned {
                return Err(invalid());
            }
            requires(Role::AssignedFreelancer, "assigned freelancer")
        }
        TaskAction::SubmitWork => {
            if task.status != TaskStatus::InProgress {
                return Err(invalid());
            }
            requires(Role::AssignedFreelancer, "assigned freelancer")
        }
        TaskAction::Complete => {
            if task.status != TaskStatus::Submitted {
                return Err(invalid());
            }
            requires(Role::Client, "client")
        }
        TaskAction::Cancel => {
            if task.status != TaskStatus::Open {
                return Err(invalid());
            }
            // No freelancer is assigned while open, so the client is the only party.
            requires(Role::Client, "client")
        }
        TaskAction::Dispute => {
            if !matches!(task.status, TaskStatus::InProgress | TaskStatus::Submitted) {
                return Err(invalid());
            }
            match role {
                Role::Client | Role::AssignedFreelancer => Ok(()),
                Role::Other => Err(LifecycleError::NotPermitted {
                    action,
                    required: "client or assigned freelancer",
                }),
            }
        }
    }
}

/// Assigning additionally requires the chosen freelancer to have proposed.
pub fn ensure_can_assign(
    task: &Task,
    caller: &Address,
    freelancer: &Address,
) -> Result<(), LifecycleError> {
    ensure_allowed(task, caller, TaskAction::Assign)?;
    if task.proposal_from(freelancer).is_none() {
        return Err(LifecycleError::NoProposal(freelancer.clone()));
    }
    Ok(())
}

/// Status a task moves to when `action` succeeds from `status`, or `None`
/// if the action does not apply there. Applying leaves the status unchanged.
pub fn next_status(status: TaskStatus, action: TaskAction) -> Option<TaskStatus> {
    use TaskStatus::*;
    match (status, action) {
        (Open, TaskAction::Apply) => Some(Open),
        (Open, TaskAction::Assign) => Some(Assigned),
        (Assigned, TaskAction::Start) => Some(InProgress),
        (InProgress, TaskAction::SubmitWork) => Some(Submitted),
        (Submitted, TaskAction::Complete) => Some(Completed),
        (Open, TaskAction::Cancel) => Some(Cancelled),
        (InProgress | Submitted, TaskAction::Dispute) => Some(Disputed),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;
