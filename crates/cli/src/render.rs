//! Plain-text renderings for terminal output.

use curator_core::classifier::PredictionSummary;
use curator_core::reconciler::{UploadAction, UploadOutcome};
use curator_core::scanner::FileResult;
use curator_core::tree::CategoryNode;
use curator_core::DatasetRecord;

/// Indented outline of the category tree, two spaces per level.
pub fn tree_lines(tree: &CategoryNode) -> Vec<String> {
    let mut lines = Vec::new();
    push_children(tree, 0, &mut lines);
    lines
}

fn push_children(node: &CategoryNode, depth: usize, lines: &mut Vec<String>) {
    for (name, child) in &node.children {
        lines.push(format!("{}{name}", "  ".repeat(depth)));
        push_children(child, depth + 1, lines);
    }
}

pub fn record_line(record: &DatasetRecord) -> String {
    format!(
        "{:>5}  {}  {:<30}  {}  {}",
        record.id,
        record.fingerprint,
        record.hierarchy.to_string(),
        record.uploaded_by,
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

pub fn outcome_line(outcome: &UploadOutcome) -> String {
    let record = &outcome.record;
    match &outcome.action {
        UploadAction::Created => format!("created {} in {}", record.fingerprint, record.hierarchy),
        UploadAction::Unchanged => {
            format!("unchanged {} already in {}", record.fingerprint, record.hierarchy)
        }
        UploadAction::Restored => {
            format!("restored missing object for {} in {}", record.fingerprint, record.hierarchy)
        }
        UploadAction::Reparented { from } => format!(
            "moved {} from {from} to {}",
            record.fingerprint, record.hierarchy
        ),
        UploadAction::Replaced { evicted } => format!(
            "replaced {} (was in {evicted}) now in {}",
            record.fingerprint, record.hierarchy
        ),
    }
}

pub fn file_line(result: &FileResult) -> String {
    let path = result.path.display();
    match (&result.outcome, &result.error) {
        (Some(outcome), _) => format!("{path}: {}", outcome_line(outcome)),
        (None, Some(err)) => format!("{path}: FAILED {err}"),
        (None, None) => format!("{path}: skipped"),
    }
}

pub fn prediction_line(p: &PredictionSummary) -> String {
    format!(
        "{:>5}  {:<12} {} / {} / {}  {:.2}%  {}  {}",
        p.id,
        p.label,
        p.main_type,
        p.sub_type,
        p.sub_sub_type,
        p.confidence,
        p.dominant_color,
        p.timestamp
    )
}
