use crate::validation::FieldError;

fn join(errs: &[FieldError]) -> String {
    errs.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The policy itself is malformed; rescheduling will not help until it changes.
    #[error("invalid placement: {}", join(.0))]
    Validation(Vec<FieldError>),
    #[error("desired replicas must not be negative, got {0}")]
    InvalidReplicas(i32),
    #[error("cluster {0} appears more than once among the candidates")]
    DuplicateCluster(String),
    #[error("no cluster fits: {0}")]
    NoFeasibleCluster(String),
    #[error("spread by {key}: need at least {required} groups, only {available} available")]
    MinGroupsUnmet { key: String, required: i32, available: usize },
    #[error("spread by {key}: selected {selected} groups, allowed {min}..={max}")]
    GroupBoundViolated { key: String, selected: usize, min: i32, max: i32 },
}

impl ScheduleError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ScheduleError::Validation(_) | ScheduleError::InvalidReplicas(_) | ScheduleError::DuplicateCluster(_)
        )
    }
}
