//! The assignment pipeline: validate, formulate, solve, decode.

use tracing::{info, warn};

use crate::decoder::{self, SolveStatus};
use crate::error::Result;
use crate::formulation::build_assignment_model;
use crate::models::{AssignmentConfig, AssignmentResult, JobSlot, StudentRecord};
use crate::neos::SolverService;
use crate::roster;

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub result: AssignmentResult,
    pub status: SolveStatus,
    pub listing: String,
}

pub struct AssignmentPlanner<'a, S: SolverService + ?Sized> {
    solver: &'a S,
    config: &'a AssignmentConfig,
}

impl<'a, S: SolverService + ?Sized> AssignmentPlanner<'a, S> {
    pub fn new(solver: &'a S, config: &'a AssignmentConfig) -> Self {
        Self { solver, config }
    }

    /// Input problems are reported before anything reaches the solver.
    pub async fn plan(&self, students: &[StudentRecord], slots: &[JobSlot]) -> Result<PlanOutcome> {
        roster::validate_assignment(students, slots)?;

        let model = build_assignment_model(students, slots, self.config);
        info!(
            students = students.len(),
            slots = slots.len(),
            variables = model.binaries().len(),
            "Submitting assignment model"
        );

        let listing = self.solver.solve(&model).await?;
        let solution = decoder::parse_listing(&listing)?;
        if solution.status == SolveStatus::Feasible {
            warn!("Solver stopped early; the assignment may not be optimal");
        }
        decoder::check_model(&solution, &model)?;
        let result = decoder::decode_assignment(&solution, students, slots)?;

        Ok(PlanOutcome {
            result,
            status: solution.status,
            listing,
        })
    }
}
