//! Run summary rendering.
//!
//! Turns a [`RunSummary`] into a Markdown document or pretty JSON so a run
//! can be archived next to the scheduler's logs.

use crate::models::{RunSummary, SubjectOutcome, SubjectReport};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown summary.
pub fn generate_markdown_summary(summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str("# Vestro Sync Run\n\n");
    output.push_str(&generate_metadata_section(summary));
    output.push_str(&generate_totals_section(summary));
    output.push_str(&generate_subjects_section(&summary.subjects));
    output.push_str(&generate_skipped_section(&summary.subjects));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(summary: &RunSummary) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Started:** {}\n",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Finished:** {}\n",
        summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        summary.duration_seconds()
    ));
    section.push_str(&format!("- **Subjects:** {}\n", summary.subjects.len()));
    section.push('\n');

    section
}

fn generate_totals_section(summary: &RunSummary) -> String {
    let mut section = String::new();

    let supplies: usize = summary.subjects.iter().map(|s| s.supplies).sum();
    let sales: usize = summary.subjects.iter().map(|s| s.product_sales).sum();

    section.push_str("## Totals\n\n");
    section.push_str("| Delivered | Empty | Skipped | Supplies | Product Sales |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n\n",
        summary.delivered(),
        summary.empty(),
        summary.skipped(),
        supplies,
        sales
    ));

    section
}

fn generate_subjects_section(subjects: &[SubjectReport]) -> String {
    let mut section = String::new();

    section.push_str("## Subjects\n\n");

    if subjects.is_empty() {
        section.push_str("No subjects were awaiting integration.\n\n");
        return section;
    }

    section.push_str("| Subject | Since | Status | Supplies | Product Sales |\n");
    section.push_str("|:---|:---|:---|:---:|:---:|\n");
    for subject in subjects {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            subject.subject_id,
            subject.since.format("%Y-%m-%d %H:%M:%S"),
            status_label(&subject.outcome),
            subject.supplies,
            subject.product_sales
        ));
    }
    section.push('\n');

    section
}

/// Reasons for every skipped subject.
fn generate_skipped_section(subjects: &[SubjectReport]) -> String {
    let skipped: Vec<_> = subjects
        .iter()
        .filter_map(|s| match &s.outcome {
            SubjectOutcome::Skipped { stage, reason } => Some((s.subject_id, stage, reason)),
            _ => None,
        })
        .collect();

    if skipped.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Skipped Subjects\n\n");
    for (id, stage, reason) in skipped {
        section.push_str(&format!("- **{}** at `{}`: {}\n", id, stage, reason));
    }
    section.push('\n');

    section
}

fn status_label(outcome: &SubjectOutcome) -> &'static str {
    match outcome {
        SubjectOutcome::Delivered => "delivered",
        SubjectOutcome::Empty => "no new data",
        SubjectOutcome::Skipped { .. } => "**skipped**",
    }
}

fn generate_footer() -> String {
    format!("---\n\n*Generated by vestro-sync v{}*\n", env!("CARGO_PKG_VERSION"))
}

/// Generate a JSON summary.
pub fn generate_json_summary(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).map_err(Into::into)
}

/// Write rendered summary content to a file.
pub fn write_summary(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write run summary to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;
    use chrono::{Duration, TimeZone, Utc};

    fn create_test_summary() -> RunSummary {
        let started_at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 0, 0).unwrap();
        let report = |subject_id, outcome, supplies| SubjectReport {
            subject_id,
            since: started_at - Duration::hours(24),
            outcome,
            supplies,
            product_sales: 1,
        };

        RunSummary {
            started_at,
            finished_at: started_at + Duration::seconds(42),
            subjects: vec![
                report(1, SubjectOutcome::Delivered, 12),
                report(2, SubjectOutcome::Empty, 0),
                report(
                    3,
                    SubjectOutcome::Skipped {
                        stage: Stage::Authenticate,
                        reason: "the remote rejected the credentials".to_string(),
                    },
                    0,
                ),
            ],
        }
    }

    #[test]
    fn test_generate_markdown_summary() {
        let markdown = generate_markdown_summary(&create_test_summary());

        assert!(markdown.contains("# Vestro Sync Run"));
        assert!(markdown.contains("- **Duration:** 42.0s"));
        assert!(markdown.contains("| 1 | 1 | 1 | 12 | 3 |"));
        assert!(markdown.contains("| 2 | 2026-03-03 05:00:00 | no new data | 0 | 1 |"));
        assert!(markdown.contains("## Skipped Subjects"));
        assert!(markdown.contains("- **3** at `authenticate`: the remote rejected the credentials"));
    }

    #[test]
    fn test_markdown_without_subjects() {
        let mut summary = create_test_summary();
        summary.subjects.clear();
        let markdown = generate_markdown_summary(&summary);

        assert!(markdown.contains("No subjects were awaiting integration."));
        assert!(!markdown.contains("## Skipped Subjects"));
    }

    #[test]
    fn test_generate_json_summary() {
        let json = generate_json_summary(&create_test_summary()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["subjects"][0]["outcome"]["status"], "delivered");
        assert_eq!(value["subjects"][2]["outcome"]["stage"], "authenticate");
    }

    #[test]
    fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.md");
        write_summary("# hello\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# hello\n");
    }
}
