//! Course-by-course group rotation for a cohort.
//!
//! Each course splits the cohort into balanced groups. The solver favours
//! pairs that have not yet worked together, and the interaction matrix
//! carries what happened in earlier courses into the next model.

use tracing::{info, warn};

use crate::decoder::{self, SolveStatus};
use crate::error::Result;
use crate::formulation::build_rotation_model;
use crate::models::{CohortMember, Course, RotationConfig};
use crate::neos::SolverService;
use crate::roster::validate_cohort;

/// Symmetric count of how often two students shared a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionMatrix {
    size: usize,
    counts: Vec<u32>,
}

impl InteractionMatrix {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            counts: vec![0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, i: usize, j: usize) -> u32 {
        self.counts[i * self.size + j]
    }

    pub fn row(&self, i: usize) -> &[u32] {
        &self.counts[i * self.size..(i + 1) * self.size]
    }

    /// Count one more meeting for every pair in `group`.
    pub fn record_group(&mut self, group: &[usize]) {
        for (k, &a) in group.iter().enumerate() {
            for &b in &group[k + 1..] {
                self.counts[a * self.size + b] += 1;
                self.counts[b * self.size + a] += 1;
            }
        }
    }

    pub fn record_groups(&mut self, groups: &[Vec<usize>]) {
        for group in groups {
            self.record_group(group);
        }
    }

    /// Upper-triangle pair counts.
    pub fn pair_counts(&self) -> Vec<u32> {
        let mut pairs = Vec::with_capacity(self.size * self.size.saturating_sub(1) / 2);
        for i in 0..self.size {
            for j in (i + 1)..self.size {
                pairs.push(self.get(i, j));
            }
        }
        pairs
    }

    /// How many different classmates `i` has shared a group with.
    pub fn distinct_partners(&self, i: usize) -> usize {
        self.row(i).iter().filter(|&&c| c > 0).count()
    }

    pub fn summary(&self, course: u32, max_interaction: u32) -> CourseSummary {
        let pairs = self.pair_counts();
        let mut totals: Vec<usize> = (0..self.size).map(|i| self.distinct_partners(i)).collect();
        totals.sort_unstable();

        let avg_student = if totals.is_empty() {
            0.0
        } else {
            let mean = totals.iter().sum::<usize>() as f64 / totals.len() as f64;
            (mean * 100.0).round() / 100.0
        };
        let median_student = match totals.len() {
            0 => 0.0,
            n if n % 2 == 1 => totals[n / 2] as f64,
            n => (totals[n / 2 - 1] + totals[n / 2]) as f64 / 2.0,
        };

        CourseSummary {
            course,
            unmet_pairs: pairs.iter().filter(|&&c| c == 0).count(),
            max_pairwise: pairs.iter().copied().max().unwrap_or(0),
            pairs_at_cap: pairs.iter().filter(|&&c| c >= max_interaction).count(),
            min_student: totals.first().copied().unwrap_or(0),
            max_student: totals.last().copied().unwrap_or(0),
            avg_student,
            median_student,
            fully_paired: totals
                .iter()
                .filter(|&&t| t == self.size.saturating_sub(1))
                .count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseSummary {
    pub course: u32,
    pub unmet_pairs: usize,
    pub max_pairwise: u32,
    pub pairs_at_cap: usize,
    pub min_student: usize,
    pub max_student: usize,
    pub avg_student: f64,
    pub median_student: f64,
    pub fully_paired: usize,
}

#[derive(Debug, Clone)]
pub struct CourseOutcome {
    pub course: Course,
    pub groups: Vec<Vec<usize>>,
    /// Matrix after this course's groups were recorded.
    pub interactions: InteractionMatrix,
    pub summary: CourseSummary,
    pub status: SolveStatus,
    pub listing: String,
}

#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub members: Vec<CohortMember>,
    pub courses: Vec<CourseOutcome>,
}

impl RotationOutcome {
    pub fn final_interactions(&self) -> Option<&InteractionMatrix> {
        self.courses.last().map(|c| &c.interactions)
    }
}

/// Split `students` into `groups` sizes differing by at most one, larger
/// groups first.
pub fn balanced_group_sizes(students: usize, groups: usize) -> Vec<usize> {
    if groups == 0 {
        return Vec::new();
    }
    let base = students / groups;
    let extra = students % groups;
    (0..groups)
        .map(|g| if g < extra { base + 1 } else { base })
        .collect()
}

pub struct RotationPlanner<'a, S: SolverService + ?Sized> {
    solver: &'a S,
    config: &'a RotationConfig,
}

impl<'a, S: SolverService + ?Sized> RotationPlanner<'a, S> {
    pub fn new(solver: &'a S, config: &'a RotationConfig) -> Self {
        Self { solver, config }
    }

    /// Solve every configured course in order. Nothing is submitted if the
    /// roster fails validation.
    pub async fn run(&self, members: &[CohortMember]) -> Result<RotationOutcome> {
        validate_cohort(members, self.config)?;

        let sizes = balanced_group_sizes(members.len(), self.config.groups);
        let mut interactions = InteractionMatrix::new(members.len());
        let mut courses = Vec::with_capacity(self.config.courses.len());

        for (k, course) in self.config.courses.iter().enumerate() {
            info!(
                course = course.number,
                step = k + 1,
                of = self.config.courses.len(),
                "Building rotation model"
            );
            let model = build_rotation_model(
                &format!("rotation_{}", course.number),
                members,
                &sizes,
                &interactions,
                self.config,
            );

            let listing = self.solver.solve(&model).await?;
            let solution = decoder::parse_listing(&listing)?;
            if solution.status == SolveStatus::Feasible {
                warn!(
                    course = course.number,
                    "Solver stopped early; this course's groups may not be optimal"
                );
            }
            decoder::check_model(&solution, &model)?;
            let groups = decoder::decode_groups(&solution, members.len(), &sizes)?;

            interactions.record_groups(&groups);
            let summary = interactions.summary(course.number, self.config.max_interaction);
            info!(
                course = course.number,
                unmet_pairs = summary.unmet_pairs,
                max_pairwise = summary.max_pairwise,
                "Course groups decoded"
            );

            courses.push(CourseOutcome {
                course: course.clone(),
                groups,
                interactions: interactions.clone(),
                summary,
                status: solution.status,
                listing,
            });
        }

        Ok(RotationOutcome {
            members: members.to_vec(),
            courses,
        })
    }
}
