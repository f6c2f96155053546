use serde::{Deserialize, Serialize};

use crate::error::InputError;

pub const DEFAULT_NEOS_URL: &str = "https://neos-server.org:3333";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Contact address NEOS requires for every submitted job.
    pub email: String,
    pub output_directory: Option<String>,
    pub neos: NeosConfig,
    pub assignment: AssignmentConfig,
    pub rotation: RotationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeosConfig {
    pub url: String,
    pub category: String,
    pub solver: String,
    pub input_method: String,
    /// Per-job limit handed to the solver, not to the HTTP client.
    pub time_limit_secs: u64,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Cost of placing a student in a job code they did not list.
    pub unranked_cost: u32,
    /// Capacity given to every derived job slot when no slots file is used.
    /// Unset means every slot can take the whole roster.
    pub default_capacity: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub groups: usize,
    pub max_interaction: u32,
    pub penalty_threshold: u32,
    pub penalty_weight: f64,
    pub max_per_code: usize,
    pub courses: Vec<Course>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub number: u32,
    pub title: String,
}

impl Course {
    pub fn new(number: u32, title: &str) -> Self {
        Self {
            number,
            title: title.to_string(),
        }
    }

    pub fn label(&self) -> String {
        if self.title.is_empty() {
            self.number.to_string()
        } else {
            format!("{} - {}", self.number, self.title)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            email: "".to_string(),
            output_directory: Some("output".to_string()),
            neos: NeosConfig::default(),
            assignment: AssignmentConfig::default(),
            rotation: RotationConfig::default(),
        }
    }
}

impl Default for NeosConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NEOS_URL.to_string(),
            category: "milp".to_string(),
            solver: "CPLEX".to_string(),
            input_method: "LP".to_string(),
            time_limit_secs: 600,
            poll_interval_secs: 5,
            max_wait_secs: 900,
            request_timeout_secs: 60,
        }
    }
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            unranked_cost: 100,
            default_capacity: None,
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            groups: 4,
            max_interaction: 4,
            penalty_threshold: 3,
            penalty_weight: 0.25,
            max_per_code: 2,
            courses: vec![
                Course::new(601, "Strategy"),
                Course::new(600, "Theory"),
                Course::new(627, "Total War"),
                Course::new(632, "Intl Politics"),
                Course::new(628, "Limited War"),
                Course::new(633, "Coercion"),
                Course::new(644, "IW"),
                Course::new(667, "Cyber"),
                Course::new(665, "Space"),
                Course::new(660, "Innovation"),
            ],
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }

    pub fn output_dir(&self) -> &str {
        self.output_directory.as_deref().unwrap_or("output")
    }

    /// The contact email, rejected before anything is sent to the solver.
    pub fn require_email(&self) -> Result<&str, InputError> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(InputError::MissingEmail);
        }
        Ok(email)
    }
}

/// One uploaded row: a student and their job codes in preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    pub preferences: Vec<String>,
}

impl StudentRecord {
    pub fn new(name: &str, preferences: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            preferences: preferences.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// 0-based position of `code` in this student's preference list.
    pub fn rank_of(&self, code: &str) -> Option<usize> {
        self.preferences.iter().position(|p| p == code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSlot {
    pub code: String,
    pub capacity: u32,
}

impl JobSlot {
    pub fn new(code: &str, capacity: u32) -> Self {
        Self {
            code: code.to_string(),
            capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub student: String,
    pub code: String,
    /// `None` when the student was placed in a code they did not list.
    pub rank: Option<usize>,
}

/// Decoded placement of every student, in roster order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub assignments: Vec<Assignment>,
    pub slots: Vec<JobSlot>,
    pub objective: Option<f64>,
}

impl AssignmentResult {
    pub fn slot_of(&self, student: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.student == student)
            .map(|a| a.code.as_str())
    }

    /// Number of students placed in each slot, in slot order.
    pub fn fill(&self) -> Vec<(&JobSlot, usize)> {
        self.slots
            .iter()
            .map(|slot| {
                let count = self
                    .assignments
                    .iter()
                    .filter(|a| a.code == slot.code)
                    .count();
                (slot, count)
            })
            .collect()
    }

    pub fn first_choice_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.rank == Some(0)).count()
    }

    pub fn average_rank(&self) -> Option<f64> {
        let ranks: Vec<usize> = self.assignments.iter().filter_map(|a| a.rank).collect();
        if ranks.is_empty() {
            None
        } else {
            Some(ranks.iter().map(|r| (r + 1) as f64).sum::<f64>() / ranks.len() as f64)
        }
    }
}

/// Students x job codes, `true` where the student was placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentMatrix {
    pub students: Vec<String>,
    pub codes: Vec<String>,
    pub cells: Vec<Vec<bool>>,
}

/// One row of a rotation roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortMember {
    pub name: String,
    pub code: String,
}

impl CohortMember {
    pub fn new(name: &str, code: &str) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
        }
    }
}
