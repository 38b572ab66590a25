//! Table and value formatting for CLI output.

use chrono::{DateTime, Utc};
use comfy_table::{ContentArrangement, Table};

use modelmirror_core::metadata::{ImportResult, MirrorInformation, MirrorKind};
use modelmirror_core::queue::JobState;
use modelmirror_runtime::EntryKind;

/// Create a borderless table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Elapsed time between two instants, or "-" when either is unknown.
pub fn format_elapsed(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> String {
    match (start, end) {
        (Some(start), Some(end)) => {
            let millis = end.signed_duration_since(start).num_milliseconds().max(0);
            if millis < 1000 {
                format!("{millis}ms")
            } else {
                format!("{:.1}s", millis as f64 / 1000.0)
            }
        }
        _ => "-".to_string(),
    }
}

pub fn format_job_state(state: &JobState) -> String {
    match state {
        JobState::Pending => "pending".to_string(),
        JobState::Running => "running".to_string(),
        JobState::Succeeded => "succeeded".to_string(),
        JobState::Failed(error) => format!("failed: {error}"),
    }
}

pub fn format_entry_kind(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::File => "file",
        EntryKind::Directory => "dir",
        EntryKind::Link => "link",
        EntryKind::Other => "other",
    }
}

/// Key/value rows describing an import outcome.
pub fn information_rows(information: &MirrorInformation) -> Vec<(String, String)> {
    let metadata = &information.metadata;
    let mut rows = vec![
        ("kind".to_string(), metadata.import_kind().to_string()),
        ("exporter".to_string(), metadata.exporter.clone()),
        ("source model".to_string(), metadata.source_model_id.clone()),
        ("mirrored model".to_string(), metadata.mirrored_model_id.clone()),
    ];
    if let MirrorKind::Image {
        distribution_package_name,
    } = &metadata.kind
    {
        rows.push(("source image".to_string(), distribution_package_name.clone()));
    }

    match &information.result {
        ImportResult::Documents {
            model_card_versions,
            release_semvers,
            file_ids,
            image_ids,
        } => {
            let versions: Vec<String> = model_card_versions.iter().map(u32::to_string).collect();
            rows.push(("model cards".to_string(), join_or_dash(&versions)));
            rows.push(("releases".to_string(), join_or_dash(release_semvers)));
            rows.push(("files".to_string(), join_or_dash(file_ids)));
            rows.push(("images".to_string(), join_or_dash(image_ids)));
        }
        ImportResult::File { file_id, file_path } => {
            rows.push(("file".to_string(), file_id.clone()));
            rows.push(("path".to_string(), file_path.clone()));
        }
        ImportResult::Image { image_id } => {
            rows.push(("image".to_string(), image_id.clone()));
        }
    }
    rows
}

fn join_or_dash(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}
