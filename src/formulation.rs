//! Builds the 0/1 models submitted to the solver.

use std::collections::BTreeMap;

use crate::lp::{LinearModel, Relation, Sense, Term};
use crate::models::{AssignmentConfig, CohortMember, JobSlot, RotationConfig, StudentRecord};
use crate::rotation::InteractionMatrix;

pub fn assignment_var(student: usize, slot: usize) -> String {
    format!("x_{}_{}", student, slot)
}

pub fn group_var(student: usize, group: usize) -> String {
    format!("x_{}_{}", student, group)
}

pub fn pair_var(first: usize, second: usize, group: usize) -> String {
    format!("w_{}_{}_{}", first, second, group)
}

/// Cost of placing `student` in `code`: its rank position, or the configured
/// penalty when the student did not list it.
pub fn preference_cost(student: &StudentRecord, code: &str, config: &AssignmentConfig) -> u32 {
    student
        .rank_of(code)
        .map(|rank| rank as u32)
        .unwrap_or(config.unranked_cost)
}

/// One binary per (student, slot); every student placed exactly once, slots
/// held to capacity, total preference cost minimized.
pub fn build_assignment_model(
    students: &[StudentRecord],
    slots: &[JobSlot],
    config: &AssignmentConfig,
) -> LinearModel {
    let mut model = LinearModel::new("job_assignment", Sense::Minimize);

    for (i, student) in students.iter().enumerate() {
        for (j, slot) in slots.iter().enumerate() {
            let var = model.add_binary(assignment_var(i, j));
            model.add_objective_term(preference_cost(student, &slot.code, config) as f64, var);
        }
    }

    for i in 0..students.len() {
        let terms = (0..slots.len())
            .map(|j| Term::new(1.0, assignment_var(i, j)))
            .collect();
        model.add_constraint(format!("assign_{}", i), terms, Relation::Eq, 1.0);
    }

    for (j, slot) in slots.iter().enumerate() {
        let terms = (0..students.len())
            .map(|i| Term::new(1.0, assignment_var(i, j)))
            .collect();
        model.add_constraint(
            format!("capacity_{}", j),
            terms,
            Relation::Le,
            slot.capacity as f64,
        );
    }

    model
}

/// Group split for one course. Pairs that have never shared a group score a
/// point, pairs at the penalty threshold lose `penalty_weight`, pairs at the
/// interaction cap are kept apart.
pub fn build_rotation_model(
    name: &str,
    members: &[CohortMember],
    group_sizes: &[usize],
    interactions: &InteractionMatrix,
    config: &RotationConfig,
) -> LinearModel {
    let mut model = LinearModel::new(name, Sense::Maximize);
    let students = members.len();
    let groups = group_sizes.len();

    for s in 0..students {
        for g in 0..groups {
            model.add_binary(group_var(s, g));
        }
    }

    for i in 0..students {
        for j in (i + 1)..students {
            let met = interactions.get(i, j);
            let mut coef = if met == 0 { 1.0 } else { 0.0 };
            if met >= config.penalty_threshold {
                coef -= config.penalty_weight;
            }
            for g in 0..groups {
                let var = model.add_binary(pair_var(i, j, g));
                model.add_objective_term(coef, var);
            }
        }
    }

    for s in 0..students {
        let terms = (0..groups).map(|g| Term::new(1.0, group_var(s, g))).collect();
        model.add_constraint(format!("assign_once_{}", s), terms, Relation::Eq, 1.0);
    }

    for (g, size) in group_sizes.iter().enumerate() {
        let terms = (0..students).map(|s| Term::new(1.0, group_var(s, g))).collect();
        model.add_constraint(format!("group_size_{}", g), terms, Relation::Eq, *size as f64);
    }

    let mut by_code: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (s, member) in members.iter().enumerate() {
        by_code.entry(member.code.as_str()).or_default().push(s);
    }
    for (c, indices) in by_code.values().enumerate() {
        if indices.len() <= config.max_per_code {
            continue;
        }
        for g in 0..groups {
            let terms = indices.iter().map(|&s| Term::new(1.0, group_var(s, g))).collect();
            model.add_constraint(
                format!("code_limit_{}_{}", c, g),
                terms,
                Relation::Le,
                config.max_per_code as f64,
            );
        }
    }

    for i in 0..students {
        for j in (i + 1)..students {
            let capped = interactions.get(i, j) >= config.max_interaction;
            for g in 0..groups {
                let w = pair_var(i, j, g);
                model.add_constraint(
                    format!("link_i_{}_{}_{}", i, j, g),
                    vec![Term::new(1.0, &w), Term::new(-1.0, group_var(i, g))],
                    Relation::Le,
                    0.0,
                );
                model.add_constraint(
                    format!("link_j_{}_{}_{}", i, j, g),
                    vec![Term::new(1.0, &w), Term::new(-1.0, group_var(j, g))],
                    Relation::Le,
                    0.0,
                );
                model.add_constraint(
                    format!("link_both_{}_{}_{}", i, j, g),
                    vec![
                        Term::new(1.0, &w),
                        Term::new(-1.0, group_var(i, g)),
                        Term::new(-1.0, group_var(j, g)),
                    ],
                    Relation::Ge,
                    -1.0,
                );
                if capped {
                    model.add_constraint(
                        format!("cap_{}_{}_{}", i, j, g),
                        vec![Term::new(1.0, &w)],
                        Relation::Eq,
                        0.0,
                    );
                }
            }
        }
    }

    model
}
