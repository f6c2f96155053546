//! Files written to the output directory, plus console summaries.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;

use crate::decoder::assignment_matrix;
use crate::models::{AssignmentResult, CohortMember};
use crate::planner::PlanOutcome;
use crate::rotation::{InteractionMatrix, RotationOutcome};

const BAR_WIDTH: usize = 40;

/// Heatmap shades from zero meetings up to four or more.
const SHADES: [char; 5] = ['.', '░', '▒', '▓', '█'];

pub fn clean_output_directory(output_dir: &str) -> Result<()> {
    let output_path = Path::new(output_dir);

    if !output_path.exists() {
        return Ok(());
    }

    println!("🧹 Cleaning previous results...");

    let items_to_clean = [
        "assignment.csv",
        "assignment_matrix.csv",
        "slot_fill.txt",
        "solver_output.txt",
        "summary.csv",
        "heatmap_final.txt",
        "interaction_bar_final.txt",
        "groups",
        "matrices",
        "listings",
        "heatmaps",
        "bars",
    ];

    for item in &items_to_clean {
        let item_path = output_path.join(item);

        if item_path.is_file() {
            fs::remove_file(&item_path)?;
            println!("   🗑️  Removed file: {}", item);
        } else if item_path.is_dir() {
            fs::remove_dir_all(&item_path)?;
            println!("   🗑️  Removed directory: {}", item);
        }
    }

    println!("   ✅ Output directory cleaned");
    Ok(())
}

fn bar(value: usize, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    let filled = (value * BAR_WIDTH + max / 2) / max;
    "█".repeat(filled.min(BAR_WIDTH))
}

pub fn write_assignment_reports(outcome: &PlanOutcome, output_dir: &str) -> Result<()> {
    write_assignment_csv(&outcome.result, output_dir)?;
    write_assignment_matrix(&outcome.result, output_dir)?;
    write_slot_fill(&outcome.result, output_dir)?;
    fs::write(Path::new(output_dir).join("solver_output.txt"), &outcome.listing)?;
    Ok(())
}

fn write_assignment_csv(result: &AssignmentResult, output_dir: &str) -> Result<()> {
    let csv_path = Path::new(output_dir).join("assignment.csv");
    let mut writer = Writer::from_path(&csv_path)
        .with_context(|| format!("creating {}", csv_path.display()))?;

    writer.write_record(["Student", "Job Code", "Preference Rank"])?;
    for assignment in &result.assignments {
        let rank = assignment
            .rank
            .map(|r| (r + 1).to_string())
            .unwrap_or_else(|| "unranked".to_string());
        writer.write_record([assignment.student.as_str(), &assignment.code, &rank])?;
    }

    writer.flush()?;
    Ok(())
}

fn write_assignment_matrix(result: &AssignmentResult, output_dir: &str) -> Result<()> {
    let matrix = assignment_matrix(result);
    let mut writer = Writer::from_path(Path::new(output_dir).join("assignment_matrix.csv"))?;

    let mut header = vec!["Student".to_string()];
    header.extend(matrix.codes.iter().cloned());
    writer.write_record(&header)?;

    for (student, row) in matrix.students.iter().zip(&matrix.cells) {
        let mut record = vec![student.clone()];
        record.extend(row.iter().map(|&cell| (if cell { "1" } else { "0" }).to_string()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_slot_fill(result: &AssignmentResult, output_dir: &str) -> Result<()> {
    let fill = result.fill();
    let width = fill.iter().map(|(slot, _)| slot.code.len()).max().unwrap_or(0);

    let mut content = String::new();
    content.push_str("Slot Fill\n");
    content.push_str("=========\n\n");
    for (slot, used) in &fill {
        content.push_str(&format!(
            "{:<width$}  {:<bar_width$}  {}/{}\n",
            slot.code,
            bar(*used, slot.capacity as usize),
            used,
            slot.capacity,
            width = width,
            bar_width = BAR_WIDTH,
        ));
    }

    fs::write(Path::new(output_dir).join("slot_fill.txt"), content)?;
    Ok(())
}

pub fn write_rotation_reports(outcome: &RotationOutcome, output_dir: &str) -> Result<()> {
    write_course_groups(outcome, output_dir)?;
    write_course_matrices(outcome, output_dir)?;
    write_course_listings(outcome, output_dir)?;
    write_summary_csv(outcome, output_dir)?;

    write_course_plots(outcome, output_dir)?;

    if let Some(last) = outcome.final_interactions() {
        let out = Path::new(output_dir);
        write_heatmap(last, "Final Interaction Heatmap", &out.join("heatmap_final.txt"))?;
        write_interaction_bars(
            last,
            &outcome.members,
            "Distinct Classmates Met",
            &out.join("interaction_bar_final.txt"),
        )?;
    }
    Ok(())
}

fn write_course_plots(outcome: &RotationOutcome, output_dir: &str) -> Result<()> {
    let heatmaps_dir = Path::new(output_dir).join("heatmaps");
    let bars_dir = Path::new(output_dir).join("bars");
    fs::create_dir_all(&heatmaps_dir)?;
    fs::create_dir_all(&bars_dir)?;

    for course in &outcome.courses {
        let label = course.course.label();
        write_heatmap(
            &course.interactions,
            &format!("Interaction Heatmap after {}", label),
            &heatmaps_dir.join(format!("heatmap_{}.txt", course.course.number)),
        )?;
        write_interaction_bars(
            &course.interactions,
            &outcome.members,
            &format!("Distinct Classmates Met after {}", label),
            &bars_dir.join(format!("interaction_bar_{}.txt", course.course.number)),
        )?;
    }
    Ok(())
}

fn underline(title: &str) -> String {
    format!("{}\n{}\n", title, "=".repeat(title.chars().count()))
}

fn write_course_groups(outcome: &RotationOutcome, output_dir: &str) -> Result<()> {
    let groups_dir = Path::new(output_dir).join("groups");
    fs::create_dir_all(&groups_dir)?;

    for course in &outcome.courses {
        let csv_path = groups_dir.join(format!("{}.csv", course.course.number));
        let mut writer = Writer::from_path(csv_path)?;
        writer.write_record(["Course", "Group", "Student Index", "Student Name", "AFSC"])?;

        let label = course.course.label();
        for (g, group) in course.groups.iter().enumerate() {
            for &s in group {
                let member = &outcome.members[s];
                writer.write_record([
                    label.as_str(),
                    &(g + 1).to_string(),
                    &s.to_string(),
                    &member.name,
                    &member.code,
                ])?;
            }
        }
        writer.flush()?;
    }
    Ok(())
}

fn write_course_matrices(outcome: &RotationOutcome, output_dir: &str) -> Result<()> {
    let matrices_dir = Path::new(output_dir).join("matrices");
    fs::create_dir_all(&matrices_dir)?;

    for course in &outcome.courses {
        let csv_path = matrices_dir.join(format!("matrix_{}.csv", course.course.number));
        let mut writer = Writer::from_path(csv_path)?;

        let mut header = vec![String::new()];
        header.extend(outcome.members.iter().map(|m| m.name.clone()));
        writer.write_record(&header)?;

        for (i, member) in outcome.members.iter().enumerate() {
            let mut record = vec![member.name.clone()];
            record.extend(course.interactions.row(i).iter().map(u32::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;
    }
    Ok(())
}

fn write_course_listings(outcome: &RotationOutcome, output_dir: &str) -> Result<()> {
    let listings_dir = Path::new(output_dir).join("listings");
    fs::create_dir_all(&listings_dir)?;
    for course in &outcome.courses {
        fs::write(
            listings_dir.join(format!("solver_{}.txt", course.course.number)),
            &course.listing,
        )?;
    }
    Ok(())
}

fn write_summary_csv(outcome: &RotationOutcome, output_dir: &str) -> Result<()> {
    let mut writer = Writer::from_path(Path::new(output_dir).join("summary.csv"))?;
    writer.write_record([
        "Course",
        "Unmet Pairs",
        "Max Pairwise",
        "Pairs At Cap",
        "Min Partners",
        "Max Partners",
        "Avg Partners",
        "Median Partners",
        "Fully Paired",
    ])?;

    for course in &outcome.courses {
        let s = &course.summary;
        writer.write_record([
            course.course.label(),
            s.unmet_pairs.to_string(),
            s.max_pairwise.to_string(),
            s.pairs_at_cap.to_string(),
            s.min_student.to_string(),
            s.max_student.to_string(),
            format!("{:.2}", s.avg_student),
            format!("{:.1}", s.median_student),
            s.fully_paired.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn write_heatmap(matrix: &InteractionMatrix, title: &str, path: &Path) -> Result<()> {
    let mut content = underline(title);
    content.push_str(&format!(
        "Legend: {} 0  {} 1  {} 2  {} 3  {} 4+\n\n",
        SHADES[0], SHADES[1], SHADES[2], SHADES[3], SHADES[4]
    ));

    let label_width = matrix.size().saturating_sub(1).to_string().len();
    for i in 0..matrix.size() {
        content.push_str(&format!("{:>width$} ", i, width = label_width));
        for (j, &count) in matrix.row(i).iter().enumerate() {
            let shade = if i == j {
                ' '
            } else {
                SHADES[(count as usize).min(SHADES.len() - 1)]
            };
            content.push(shade);
        }
        content.push('\n');
    }

    fs::write(path, content)?;
    Ok(())
}

/// One bar per student, fewest distinct classmates first.
fn write_interaction_bars(
    matrix: &InteractionMatrix,
    members: &[CohortMember],
    title: &str,
    path: &Path,
) -> Result<()> {
    let possible = matrix.size().saturating_sub(1);
    let width = members.iter().map(|m| m.name.chars().count()).max().unwrap_or(0);

    let mut order: Vec<usize> = (0..members.len()).collect();
    order.sort_by_key(|&i| matrix.distinct_partners(i));

    let mut content = underline(title);
    content.push('\n');
    for i in order {
        let member = &members[i];
        let met = matrix.distinct_partners(i);
        content.push_str(&format!(
            "{:<width$}  {:<bar_width$}  {}/{}\n",
            member.name,
            bar(met, possible),
            met,
            possible,
            width = width,
            bar_width = BAR_WIDTH,
        ));
    }

    fs::write(path, content)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Assignment,
    Rotation,
}

impl SampleKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "assign" | "assignment" => Some(SampleKind::Assignment),
            "rotate" | "rotation" => Some(SampleKind::Rotation),
            _ => None,
        }
    }
}

const SAMPLE_NAMES: [&str; 12] = [
    "Jenkins-P", "Brown-D", "Taylor-J", "Jones-P", "Garcia-M", "Miller-R",
    "Davis-K", "Wilson-T", "Moore-A", "Clark-S", "Lewis-B", "Walker-E",
];

const SAMPLE_CODES: [&str; 6] = ["15A", "21A", "11F", "Army", "Navy", "Civ"];

/// Write an example roster the matching subcommand can read back.
pub fn write_sample_roster(kind: SampleKind, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer =
        Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;

    match kind {
        SampleKind::Assignment => {
            writer.write_record(["Student Name", "Choice 1", "Choice 2", "Choice 3"])?;
            for (i, name) in SAMPLE_NAMES.iter().enumerate() {
                let pick = |offset: usize| SAMPLE_CODES[(i + offset) % 3];
                writer.write_record([*name, pick(0), pick(1), pick(2)])?;
            }
        }
        SampleKind::Rotation => {
            writer.write_record(["Student Name", "AFSC"])?;
            for (i, name) in SAMPLE_NAMES.iter().enumerate() {
                writer.write_record([*name, SAMPLE_CODES[i % SAMPLE_CODES.len()]])?;
            }
        }
    }

    writer.flush()?;
    Ok(())
}

pub fn print_assignment_summary(outcome: &PlanOutcome) {
    let result = &outcome.result;
    println!("\n📊 ASSIGNMENT SUMMARY");
    println!("=====================\n");
    println!("👥 Students placed: {}", result.assignments.len());
    println!(
        "🥇 First choice: {}/{}",
        result.first_choice_count(),
        result.assignments.len()
    );
    if let Some(avg) = result.average_rank() {
        println!("📈 Average preference rank: {:.2}", avg);
    }
    if let Some(objective) = result.objective {
        println!("🎯 Objective: {}", objective);
    }

    println!("\n📋 Slot fill:");
    for (slot, used) in result.fill() {
        println!("   {}: {}/{}", slot.code, used, slot.capacity);
    }
}

pub fn print_rotation_summary(outcome: &RotationOutcome) {
    println!("\n📊 ROTATION SUMMARY");
    println!("===================\n");
    println!("👥 Cohort size: {}", outcome.members.len());
    for course in &outcome.courses {
        let s = &course.summary;
        println!(
            "📚 {}: unmet pairs {}, max pairwise {}, partners {}-{} (avg {:.2})",
            course.course.label(),
            s.unmet_pairs,
            s.max_pairwise,
            s.min_student,
            s.max_student,
            s.avg_student
        );
    }
    if let Some(last) = outcome.courses.last() {
        println!(
            "\n🤝 Fully paired students after {}: {}/{}",
            last.course.label(),
            last.summary.fully_paired,
            outcome.members.len()
        );
    }
}
