//! Reads uploaded CSV rosters into validated records.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, warn};

use crate::error::InputError;
use crate::models::{CohortMember, JobSlot, RotationConfig, StudentRecord};

pub const NAME_COLUMN: &str = "Student Name";
pub const CODE_COLUMN: &str = "AFSC";
pub const SLOT_CODE_COLUMN: &str = "Job Code";
pub const CAPACITY_COLUMN: &str = "Capacity";

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

fn require_column(headers: &StringRecord, name: &str) -> Result<usize, InputError> {
    find_column(headers, name).ok_or_else(|| InputError::MissingColumn(name.to_string()))
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}

/// `Student Name` plus one or more job code columns, read left to right as
/// first choice, second choice and so on.
pub fn read_students<R: io::Read>(reader: R) -> Result<Vec<StudentRecord>, InputError> {
    let mut csv_reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let name_idx = require_column(&headers, NAME_COLUMN)?;
    let preference_columns: Vec<usize> = (0..headers.len()).filter(|&i| i != name_idx).collect();
    if preference_columns.is_empty() {
        return Err(InputError::MissingColumn("job code preference".to_string()));
    }

    let mut students = Vec::new();
    let mut seen = HashSet::new();

    for result in csv_reader.records() {
        let record = result?;
        if is_blank(&record) {
            debug!(line = line_of(&record), "Skipping blank row");
            continue;
        }

        let name = record.get(name_idx).unwrap_or("").to_string();
        if name.is_empty() {
            return Err(InputError::BlankField {
                line: line_of(&record),
                column: NAME_COLUMN.to_string(),
            });
        }
        if !seen.insert(name.clone()) {
            return Err(InputError::DuplicateStudent(name));
        }

        let mut preferences: Vec<String> = Vec::new();
        for &idx in &preference_columns {
            let code = record.get(idx).unwrap_or("");
            if code.is_empty() {
                continue;
            }
            if preferences.iter().any(|p| p == code) {
                return Err(InputError::DuplicatePreference {
                    student: name,
                    code: code.to_string(),
                });
            }
            preferences.push(code.to_string());
        }
        if preferences.is_empty() {
            return Err(InputError::NoPreferences(name));
        }

        students.push(StudentRecord { name, preferences });
    }

    if students.is_empty() {
        return Err(InputError::EmptyRoster);
    }
    Ok(students)
}

pub fn read_students_file(path: &Path) -> Result<Vec<StudentRecord>, InputError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    read_students(file)
}

/// `Job Code`, `Capacity` rows.
pub fn read_slots<R: io::Read>(reader: R) -> Result<Vec<JobSlot>, InputError> {
    let mut csv_reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let code_idx = require_column(&headers, SLOT_CODE_COLUMN)?;
    let capacity_idx = require_column(&headers, CAPACITY_COLUMN)?;

    let mut slots: Vec<JobSlot> = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        if is_blank(&record) {
            continue;
        }

        let code = record.get(code_idx).unwrap_or("");
        if code.is_empty() {
            return Err(InputError::BlankField {
                line: line_of(&record),
                column: SLOT_CODE_COLUMN.to_string(),
            });
        }
        if slots.iter().any(|s| s.code == code) {
            return Err(InputError::DuplicateJobCode(code.to_string()));
        }

        let raw_capacity = record.get(capacity_idx).unwrap_or("");
        let capacity = raw_capacity
            .parse::<u32>()
            .map_err(|_| InputError::InvalidCapacity {
                line: line_of(&record),
                value: raw_capacity.to_string(),
            })?;

        slots.push(JobSlot::new(code, capacity));
    }
    Ok(slots)
}

pub fn read_slots_file(path: &Path) -> Result<Vec<JobSlot>, InputError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    read_slots(file)
}

/// One slot per distinct code the students mention, sorted by code. Without a
/// default capacity every slot can take the whole roster.
pub fn derive_slots(students: &[StudentRecord], default_capacity: Option<u32>) -> Vec<JobSlot> {
    let capacity = default_capacity.unwrap_or(students.len() as u32);
    let codes: BTreeSet<&str> = students
        .iter()
        .flat_map(|s| s.preferences.iter().map(String::as_str))
        .collect();
    codes
        .into_iter()
        .map(|code| JobSlot::new(code, capacity))
        .collect()
}

/// Checks that must pass before an assignment model is submitted.
pub fn validate_assignment(students: &[StudentRecord], slots: &[JobSlot]) -> Result<(), InputError> {
    if students.is_empty() {
        return Err(InputError::EmptyRoster);
    }

    let mut seen = HashSet::new();
    for student in students {
        if !seen.insert(student.name.as_str()) {
            return Err(InputError::DuplicateStudent(student.name.clone()));
        }
    }

    let mut codes = HashSet::new();
    for slot in slots {
        if !codes.insert(slot.code.as_str()) {
            return Err(InputError::DuplicateJobCode(slot.code.clone()));
        }
    }

    for student in students {
        if let Some(code) = student
            .preferences
            .iter()
            .find(|code| !codes.contains(code.as_str()))
        {
            return Err(InputError::UnknownJobCode {
                student: student.name.clone(),
                code: code.clone(),
            });
        }
    }

    let capacity: u64 = slots.iter().map(|s| s.capacity as u64).sum();
    if capacity < students.len() as u64 {
        return Err(InputError::InsufficientCapacity {
            capacity,
            students: students.len(),
        });
    }
    Ok(())
}

/// Rotation roster: exactly `Student Name` and `AFSC`.
pub fn read_cohort<R: io::Read>(reader: R) -> Result<Vec<CohortMember>, InputError> {
    let mut csv_reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let name_idx = require_column(&headers, NAME_COLUMN)?;
    let code_idx = require_column(&headers, CODE_COLUMN)?;
    if headers.len() > 2 {
        warn!(columns = headers.len(), "Ignoring extra roster columns");
    }

    let mut members = Vec::new();
    let mut seen = HashSet::new();
    for result in csv_reader.records() {
        let record = result?;
        if is_blank(&record) {
            continue;
        }

        let line = line_of(&record);
        let name = record.get(name_idx).unwrap_or("");
        let code = record.get(code_idx).unwrap_or("");
        for (value, column) in [(name, NAME_COLUMN), (code, CODE_COLUMN)] {
            if value.is_empty() {
                return Err(InputError::BlankField {
                    line,
                    column: column.to_string(),
                });
            }
        }
        if !seen.insert(name.to_string()) {
            return Err(InputError::DuplicateStudent(name.to_string()));
        }
        members.push(CohortMember::new(name, code));
    }

    if members.is_empty() {
        return Err(InputError::EmptyRoster);
    }
    Ok(members)
}

pub fn read_cohort_file(path: &Path) -> Result<Vec<CohortMember>, InputError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    read_cohort(file)
}

/// Checks that must pass before any rotation model is submitted.
pub fn validate_cohort(members: &[CohortMember], config: &RotationConfig) -> Result<(), InputError> {
    if members.is_empty() {
        return Err(InputError::EmptyRoster);
    }
    if config.groups == 0 || members.len() < config.groups {
        return Err(InputError::TooFewStudents {
            students: members.len(),
            groups: config.groups,
        });
    }

    let limit = config.groups * config.max_per_code;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for member in members {
        *counts.entry(member.code.as_str()).or_insert(0) += 1;
    }
    let mut oversubscribed: Vec<(&str, usize)> = counts
        .into_iter()
        .filter(|(_, n)| *n > limit)
        .collect();
    oversubscribed.sort();
    if let Some((code, count)) = oversubscribed.first() {
        return Err(InputError::CodeOversubscribed {
            code: code.to_string(),
            members: *count,
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_preferences_in_column_order() {
        let csv = "Student Name,Preference 1,Preference 2,Preference 3\n\
                   Jenkins-P,15A,21A,\n\
                   Brown-D , 21A ,,15A\n";
        let students = read_students(csv.as_bytes()).unwrap();

        assert_eq!(
            students,
            vec![
                StudentRecord::new("Jenkins-P", &["15A", "21A"]),
                StudentRecord::new("Brown-D", &["21A", "15A"]),
            ]
        );
    }

    #[test]
    fn name_column_is_case_insensitive_and_can_move() {
        let csv = "AFSC,student name\n15A,Jenkins-P\n";
        let students = read_students(csv.as_bytes()).unwrap();
        assert_eq!(students[0].name, "Jenkins-P");
        assert_eq!(students[0].preferences, vec!["15A"]);
    }

    #[test]
    fn missing_name_column_is_rejected() {
        let csv = "Name,Preference 1\nJenkins-P,15A\n";
        match read_students(csv.as_bytes()) {
            Err(InputError::MissingColumn(column)) => assert_eq!(column, NAME_COLUMN),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn structural_problems_are_input_errors() {
        let only_names = "Student Name\nJenkins-P\n";
        assert!(matches!(
            read_students(only_names.as_bytes()),
            Err(InputError::MissingColumn(_))
        ));

        let duplicate = "Student Name,P1\nJenkins-P,15A\nJenkins-P,21A\n";
        assert!(matches!(
            read_students(duplicate.as_bytes()),
            Err(InputError::DuplicateStudent(name)) if name == "Jenkins-P"
        ));

        let blank_name = "Student Name,P1\n,15A\n";
        assert!(matches!(
            read_students(blank_name.as_bytes()),
            Err(InputError::BlankField { line: 2, .. })
        ));

        let no_prefs = "Student Name,P1,P2\nJenkins-P,,\n";
        assert!(matches!(
            read_students(no_prefs.as_bytes()),
            Err(InputError::NoPreferences(_))
        ));

        let repeated = "Student Name,P1,P2\nJenkins-P,15A,15A\n";
        assert!(matches!(
            read_students(repeated.as_bytes()),
            Err(InputError::DuplicatePreference { .. })
        ));

        let ragged = "Student Name,P1\nJenkins-P,15A,21A\n";
        assert!(matches!(
            read_students(ragged.as_bytes()),
            Err(InputError::Csv(_))
        ));

        let empty = "Student Name,P1\n,\n";
        assert!(matches!(
            read_students(empty.as_bytes()),
            Err(InputError::EmptyRoster)
        ));
    }

    #[test]
    fn reads_and_validates_slots() {
        let csv = "Job Code,Capacity\n15A,2\n21A, 1\n";
        let slots = read_slots(csv.as_bytes()).unwrap();
        assert_eq!(slots, vec![JobSlot::new("15A", 2), JobSlot::new("21A", 1)]);

        let bad = "Job Code,Capacity\n15A,two\n";
        assert!(matches!(
            read_slots(bad.as_bytes()),
            Err(InputError::InvalidCapacity { line: 2, .. })
        ));

        let duplicate = "Job Code,Capacity\n15A,2\n15A,1\n";
        assert!(matches!(
            read_slots(duplicate.as_bytes()),
            Err(InputError::DuplicateJobCode(_))
        ));
    }

    #[test]
    fn derived_slots_cover_every_listed_code() {
        let students = vec![
            StudentRecord::new("Jenkins-P", &["21A", "15A"]),
            StudentRecord::new("Brown-D", &["Civ"]),
        ];
        assert_eq!(
            derive_slots(&students, None),
            vec![
                JobSlot::new("15A", 2),
                JobSlot::new("21A", 2),
                JobSlot::new("Civ", 2)
            ]
        );
        assert_eq!(derive_slots(&students, Some(1))[0].capacity, 1);
    }

    #[test]
    fn validation_catches_unknown_codes_and_short_capacity() {
        let students = vec![
            StudentRecord::new("Jenkins-P", &["15A"]),
            StudentRecord::new("Brown-D", &["21A"]),
        ];

        let missing_code = vec![JobSlot::new("15A", 5)];
        assert!(matches!(
            validate_assignment(&students, &missing_code),
            Err(InputError::UnknownJobCode { code, .. }) if code == "21A"
        ));

        let tight = vec![JobSlot::new("15A", 1), JobSlot::new("21A", 0)];
        assert!(matches!(
            validate_assignment(&students, &tight),
            Err(InputError::InsufficientCapacity {
                capacity: 1,
                students: 2
            })
        ));

        let roomy = vec![JobSlot::new("15A", 1), JobSlot::new("21A", 1)];
        assert!(validate_assignment(&students, &roomy).is_ok());
    }

    #[test]
    fn reads_cohort_roster() {
        let csv = "Student Name,AFSC\nJenkins-P,15A\nBrown-D,21A\n\nTaylor-J,Civ\n";
        let members = read_cohort(csv.as_bytes()).unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members[2], CohortMember::new("Taylor-J", "Civ"));

        let no_code = "Student Name,Job\nJenkins-P,15A\n";
        assert!(matches!(
            read_cohort(no_code.as_bytes()),
            Err(InputError::MissingColumn(column)) if column == CODE_COLUMN
        ));
    }

    #[test]
    fn cohort_validation() {
        let config = RotationConfig {
            groups: 2,
            max_per_code: 1,
            ..RotationConfig::default()
        };
        let members = vec![
            CohortMember::new("A", "15A"),
            CohortMember::new("B", "15A"),
            CohortMember::new("C", "15A"),
            CohortMember::new("D", "Civ"),
        ];
        assert!(matches!(
            validate_cohort(&members, &config),
            Err(InputError::CodeOversubscribed {
                members: 3,
                limit: 2,
                ..
            })
        ));

        assert!(matches!(
            validate_cohort(&members[..1], &config),
            Err(InputError::TooFewStudents { .. })
        ));

        let relaxed = RotationConfig {
            max_per_code: 2,
            ..config
        };
        assert!(validate_cohort(&members, &relaxed).is_ok());
    }
}
