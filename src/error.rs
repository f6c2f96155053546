//! Error categories surfaced to the user.

use thiserror::Error;

/// Problems with the uploaded data, always raised before any solver call.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Line {line}: blank {column}")]
    BlankField { line: u64, column: String },

    #[error("Duplicate student name: {0}")]
    DuplicateStudent(String),

    #[error("Student {student} lists job code {code} more than once")]
    DuplicatePreference { student: String, code: String },

    #[error("Student {0} has no job code preferences")]
    NoPreferences(String),

    #[error("Duplicate job code: {0}")]
    DuplicateJobCode(String),

    #[error("Line {line}: invalid capacity {value:?}")]
    InvalidCapacity { line: u64, value: String },

    #[error("Student {student} lists unknown job code {code}")]
    UnknownJobCode { student: String, code: String },

    #[error("Total capacity {capacity} cannot hold {students} students")]
    InsufficientCapacity { capacity: u64, students: usize },

    #[error("Roster has no students")]
    EmptyRoster,

    #[error("{members} students share code {code}, but groups can hold at most {limit}")]
    CodeOversubscribed {
        code: String,
        members: usize,
        limit: usize,
    },

    #[error("{students} students cannot fill {groups} groups")]
    TooFewStudents { students: usize, groups: usize },

    #[error("A valid email address is required for NEOS submissions")]
    MissingEmail,
}

/// Failures on the solver side of the round trip.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Model is infeasible")]
    Infeasible,

    #[error("Solver stopped without a solution: {0}")]
    NoSolution(String),

    #[error("Job {job} still running after {waited_secs}s")]
    Timeout { job: u64, waited_secs: u64 },

    #[error("Solver service unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("Solver rejected the job: {0}")]
    Rejected(String),

    #[error("Malformed solver response: {0}")]
    MalformedResponse(String),

    #[error("Solution is inconsistent: {0}")]
    InvalidSolution(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;

/// Print an error with its category and a hint where one helps.
pub fn print_error(err: &anyhow::Error) {
    let category = if is_input_error(err) {
        "Input error"
    } else if is_solver_error(err) {
        "Solver error"
    } else {
        "Error"
    };
    eprintln!("❌ {}: {:#}", category, err);

    match find_solver_error(err) {
        Some(SolverError::Unavailable(_)) => {
            eprintln!("   Hint: check your network connection and the [neos] url in the config.");
        }
        Some(SolverError::Timeout { .. }) => {
            eprintln!("   Hint: raise [neos] max_wait_secs or lower time_limit_secs.");
        }
        Some(SolverError::Infeasible) => {
            eprintln!("   Hint: check slot capacities and per-group code limits.");
        }
        _ => {}
    }
    if is_input_error(err) {
        eprintln!("   Nothing was submitted to the solver.");
    }
}

fn is_input_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<InputError>().is_some()
            || matches!(
                cause.downcast_ref::<SchedulerError>(),
                Some(SchedulerError::Input(_))
            )
    })
}

fn is_solver_error(err: &anyhow::Error) -> bool {
    find_solver_error(err).is_some()
}

fn find_solver_error(err: &anyhow::Error) -> Option<&SolverError> {
    err.chain().find_map(|cause| {
        cause.downcast_ref::<SolverError>().or_else(|| {
            match cause.downcast_ref::<SchedulerError>() {
                Some(SchedulerError::Solver(solver)) => Some(solver),
                _ => None,
            }
        })
    })
}
