//! Turns a solver listing back into assignments and groups.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use crate::error::SolverError;
use crate::formulation::{assignment_var, group_var};
use crate::lp::LinearModel;
use crate::models::{Assignment, AssignmentMatrix, AssignmentResult, JobSlot, StudentRecord};

const TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    /// Stopped early (e.g. time limit) holding an integer feasible solution.
    Feasible,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    values: BTreeMap<String, f64>,
}

impl Solution {
    pub fn new(status: SolveStatus, objective: Option<f64>, values: BTreeMap<String, f64>) -> Self {
        Self {
            status,
            objective,
            values,
        }
    }

    /// Variables missing from the listing are 0.
    pub fn value(&self, var: &str) -> f64 {
        self.values.get(var).copied().unwrap_or(0.0)
    }

    pub fn is_set(&self, var: &str) -> bool {
        self.value(var) > 0.5
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }
}

/// Parse a CPLEX interactive listing as returned by NEOS.
pub fn parse_listing(text: &str) -> Result<Solution, SolverError> {
    let objective_re =
        Regex::new(r"Objective\s*=\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)").unwrap();
    let infeasible_re = Regex::new(r"(?i)\binfeasible\b").unwrap();
    let time_limit_re = Regex::new(r"(?i)time limit exceeded").unwrap();
    let variable_re =
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s+([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*$")
            .unwrap();

    let objective = objective_re
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    let Some(objective) = objective else {
        if infeasible_re.is_match(text) {
            return Err(SolverError::Infeasible);
        }
        if time_limit_re.is_match(text) {
            return Err(SolverError::NoSolution(
                "time limit reached before an integer solution was found".to_string(),
            ));
        }
        return Err(SolverError::NoSolution(listing_tail(text)));
    };

    let status = if text.to_lowercase().contains("optimal") {
        SolveStatus::Optimal
    } else {
        SolveStatus::Feasible
    };

    let mut values = BTreeMap::new();
    let mut in_table = false;
    for line in text.lines() {
        if line.trim_start().starts_with("Variable Name") {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }
        if line.trim_start().starts_with("All other variables") {
            in_table = false;
            continue;
        }
        if let Some(caps) = variable_re.captures(line) {
            if let Ok(value) = caps[2].parse::<f64>() {
                values.insert(caps[1].to_string(), value);
            }
        }
    }

    debug!(
        objective,
        nonzero = values.len(),
        ?status,
        "Parsed solver listing"
    );

    Ok(Solution::new(status, Some(objective), values))
}

fn listing_tail(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return "empty solver output".to_string();
    }
    lines[lines.len().saturating_sub(3)..].join(" | ")
}

/// Reject solutions naming unknown variables or breaking model constraints.
pub fn check_model(solution: &Solution, model: &LinearModel) -> Result<(), SolverError> {
    if let Some((var, _)) = solution
        .values()
        .iter()
        .find(|(var, value)| value.abs() > TOLERANCE && !model.has_variable(var))
    {
        return Err(SolverError::InvalidSolution(format!(
            "unknown variable {} in solver output",
            var
        )));
    }

    // binaries within the solver's integrality tolerance count as 0 or 1
    let violated = model.violated_constraints(
        |var| if solution.is_set(var) { 1.0 } else { 0.0 },
        TOLERANCE,
    );
    if !violated.is_empty() {
        let shown: Vec<&str> = violated.iter().take(5).copied().collect();
        return Err(SolverError::InvalidSolution(format!(
            "{} constraint(s) violated: {}",
            violated.len(),
            shown.join(", ")
        )));
    }
    Ok(())
}

/// Rebuild the student -> slot mapping and confirm every student is placed
/// once and no slot is over capacity.
pub fn decode_assignment(
    solution: &Solution,
    students: &[StudentRecord],
    slots: &[JobSlot],
) -> Result<AssignmentResult, SolverError> {
    let mut fill = vec![0u32; slots.len()];
    let mut assignments = Vec::with_capacity(students.len());

    for (i, student) in students.iter().enumerate() {
        let chosen: Vec<usize> = (0..slots.len())
            .filter(|&j| solution.is_set(&assignment_var(i, j)))
            .collect();
        let j = match chosen.as_slice() {
            [j] => *j,
            [] => {
                return Err(SolverError::InvalidSolution(format!(
                    "{} has no job code",
                    student.name
                )))
            }
            _ => {
                return Err(SolverError::InvalidSolution(format!(
                    "{} is placed in {} job codes",
                    student.name,
                    chosen.len()
                )))
            }
        };

        fill[j] += 1;
        let code = &slots[j].code;
        assignments.push(Assignment {
            student: student.name.clone(),
            code: code.clone(),
            rank: student.rank_of(code),
        });
    }

    for (slot, count) in slots.iter().zip(&fill) {
        if *count > slot.capacity {
            return Err(SolverError::InvalidSolution(format!(
                "{} holds {} students but has capacity {}",
                slot.code, count, slot.capacity
            )));
        }
    }

    Ok(AssignmentResult {
        assignments,
        slots: slots.to_vec(),
        objective: solution.objective,
    })
}

/// Students x slots matrix for display and download.
pub fn assignment_matrix(result: &AssignmentResult) -> AssignmentMatrix {
    let codes: Vec<String> = result.slots.iter().map(|s| s.code.clone()).collect();
    let students: Vec<String> = result
        .assignments
        .iter()
        .map(|a| a.student.clone())
        .collect();
    let cells = result
        .assignments
        .iter()
        .map(|a| codes.iter().map(|code| *code == a.code).collect())
        .collect();

    AssignmentMatrix {
        students,
        codes,
        cells,
    }
}

/// Rebuild course groups, checking each student is in exactly one group and
/// every group has its expected size.
pub fn decode_groups(
    solution: &Solution,
    students: usize,
    group_sizes: &[usize],
) -> Result<Vec<Vec<usize>>, SolverError> {
    let mut groups = vec![Vec::new(); group_sizes.len()];

    for s in 0..students {
        let chosen: Vec<usize> = (0..group_sizes.len())
            .filter(|&g| solution.is_set(&group_var(s, g)))
            .collect();
        match chosen.as_slice() {
            [g] => groups[*g].push(s),
            _ => {
                return Err(SolverError::InvalidSolution(format!(
                    "student {} is in {} groups",
                    s,
                    chosen.len()
                )))
            }
        }
    }

    for (g, (members, expected)) in groups.iter().zip(group_sizes).enumerate() {
        if members.len() != *expected {
            return Err(SolverError::InvalidSolution(format!(
                "group {} has {} students, expected {}",
                g + 1,
                members.len(),
                expected
            )));
        }
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::listing;

    const OPTIMAL: &str = "\
CPLEX> New value for time limit in seconds: 600
CPLEX> Read problem 'model.lp'
Tried aggregator 1 time.
MIP Presolve eliminated 4 rows and 4 columns.

MIP - Integer optimal solution:  Objective =  0.0000000000e+00
Solution time =    0.00 sec.  Iterations = 0  Nodes = 0

CPLEX> Incumbent solution
Variable Name           Solution Value
x_0_0                         1.000000
x_1_1                         1.000000
All other variables in the range 1-4 are 0.
";

    fn two_by_two() -> (Vec<StudentRecord>, Vec<JobSlot>) {
        (
            vec![
                StudentRecord::new("Jenkins-P", &["15A", "21A"]),
                StudentRecord::new("Brown-D", &["21A", "15A"]),
            ],
            vec![JobSlot::new("15A", 1), JobSlot::new("21A", 1)],
        )
    }

    #[test]
    fn parses_optimal_listing() {
        let solution = parse_listing(OPTIMAL).unwrap();
        assert_eq!(solution.status, SolveStatus::Optimal);
        assert_eq!(solution.objective, Some(0.0));
        assert_eq!(solution.value("x_0_0"), 1.0);
        assert_eq!(solution.value("x_0_1"), 0.0);
        // header lines before the table are not variables
        assert_eq!(solution.values().len(), 2);
    }

    #[test]
    fn decodes_disjoint_top_preferences() {
        let (students, slots) = two_by_two();
        let solution = parse_listing(OPTIMAL).unwrap();
        let result = decode_assignment(&solution, &students, &slots).unwrap();

        assert_eq!(result.slot_of("Jenkins-P"), Some("15A"));
        assert_eq!(result.slot_of("Brown-D"), Some("21A"));
        assert_eq!(result.first_choice_count(), 2);

        let matrix = assignment_matrix(&result);
        assert_eq!(matrix.codes, vec!["15A", "21A"]);
        assert_eq!(matrix.cells, vec![vec![true, false], vec![false, true]]);
    }

    #[test]
    fn time_limited_listing_is_feasible() {
        let text = "MIP - Time limit exceeded, integer feasible:  Objective =  4.5000000000e+01\n\
                    Variable Name           Solution Value\n\
                    x_0_0                         1.000000\n";
        let solution = parse_listing(text).unwrap();
        assert_eq!(solution.status, SolveStatus::Feasible);
        assert_eq!(solution.objective, Some(45.0));
    }

    #[test]
    fn infeasible_and_empty_listings_are_solver_errors() {
        assert!(matches!(
            parse_listing("MIP - Integer infeasible.\n"),
            Err(SolverError::Infeasible)
        ));
        assert!(matches!(
            parse_listing("MIP - Time limit exceeded, no integer solution.\n"),
            Err(SolverError::NoSolution(_))
        ));
        match parse_listing("Error (2) in job\n\nlicense unavailable\n") {
            Err(SolverError::NoSolution(tail)) => {
                assert_eq!(tail, "Error (2) in job | license unavailable")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_double_placement_and_overfull_slots() {
        let (students, slots) = two_by_two();

        let doubled = parse_listing(&listing(1.0, &["x_0_0", "x_0_1", "x_1_1"])).unwrap();
        assert!(matches!(
            decode_assignment(&doubled, &students, &slots),
            Err(SolverError::InvalidSolution(_))
        ));

        let crowded = parse_listing(&listing(1.0, &["x_0_0", "x_1_0"])).unwrap();
        match decode_assignment(&crowded, &students, &slots) {
            Err(SolverError::InvalidSolution(msg)) => assert!(msg.contains("capacity 1")),
            other => panic!("unexpected {:?}", other),
        }

        let missing = parse_listing(&listing(0.0, &["x_0_0"])).unwrap();
        assert!(decode_assignment(&missing, &students, &slots).is_err());
    }

    #[test]
    fn check_model_flags_unknown_variables_and_violations() {
        let (students, slots) = two_by_two();
        let model = crate::formulation::build_assignment_model(
            &students,
            &slots,
            &crate::models::AssignmentConfig::default(),
        );

        let good = parse_listing(OPTIMAL).unwrap();
        assert!(check_model(&good, &model).is_ok());

        let stray = parse_listing(&listing(0.0, &["x_0_0", "x_1_1", "x_9_9"])).unwrap();
        assert!(matches!(
            check_model(&stray, &model),
            Err(SolverError::InvalidSolution(msg)) if msg.contains("x_9_9")
        ));

        let crowded = parse_listing(&listing(0.0, &["x_0_0", "x_1_0"])).unwrap();
        assert!(matches!(
            check_model(&crowded, &model),
            Err(SolverError::InvalidSolution(msg)) if msg.contains("capacity_0")
        ));
    }

    #[test]
    fn near_integral_values_pass_the_model_check() {
        let members = vec![
            crate::models::CohortMember::new("Jenkins-P", "15A"),
            crate::models::CohortMember::new("Brown-D", "21A"),
        ];
        let model = crate::formulation::build_rotation_model(
            "rotation_601",
            &members,
            &[2],
            &crate::rotation::InteractionMatrix::new(2),
            &crate::models::RotationConfig::default(),
        );
        let text = "\
MIP - Integer optimal solution:  Objective =  1.0000000000e+00
Variable Name           Solution Value
x_0_0                         0.999990
x_1_0                         1.000000
w_0_1_0                       1.000000
All other variables in the range 1-3 are 0.
";
        let solution = parse_listing(text).unwrap();
        assert!(check_model(&solution, &model).is_ok());
        assert_eq!(decode_groups(&solution, 2, &[2]).unwrap(), vec![vec![0, 1]]);
    }

    #[test]
    fn decodes_groups_with_sizes() {
        let solution = parse_listing(&listing(3.0, &["x_0_1", "x_1_0", "x_2_1"])).unwrap();
        let groups = decode_groups(&solution, 3, &[1, 2]).unwrap();
        assert_eq!(groups, vec![vec![1], vec![0, 2]]);

        assert!(decode_groups(&solution, 3, &[2, 1]).is_err());
    }
}
