#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **gh-status-render** – Markdown rendering and atomic file-sink for
//! generated status reports.
//!
//! Rendering is a pure function from a [`ReportDocument`] to a Markdown
//! string; the sink is the only part of this crate that touches the
//! filesystem, and it does so via temp-file-then-rename so a reader never
//! observes a partially written file.

use chrono::{DateTime, Utc};
use gh_status_core::error::GhStatusError;
use gh_status_core::ids::ReportId;
use gh_status_model::{ReportStatus, StatusSummary};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Everything the renderer needs to produce the Markdown body and file
/// names for one report.
#[derive(Debug, Clone)]
pub struct ReportDocument {
    /// Report's storage id, embedded in the trailing metadata line and the
    /// dated snapshot filename.
    pub report_id: ReportId,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Inclusive window start.
    pub window_start: DateTime<Utc>,
    /// Exclusive window end.
    pub window_end: DateTime<Utc>,
    /// The model identifier that produced the summary, e.g. `"heuristic"`.
    pub model: String,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// The generated summary content.
    pub summary: StatusSummary,
}

fn status_label(status: ReportStatus) -> &'static str {
    match status {
        ReportStatus::OnTrack => "On track",
        ReportStatus::AtRisk => "At risk",
        ReportStatus::Blocked => "Blocked",
        ReportStatus::Unknown => "Unknown",
    }
}

fn render_list(heading: &str, items: &[String], out: &mut String) {
    if items.is_empty() {
        return;
    }
    out.push_str("\n## ");
    out.push_str(heading);
    out.push('\n');
    for item in items {
        out.push_str("- ");
        out.push_str(item);
        out.push('\n');
    }
}

/// Render a [`ReportDocument`] into its Markdown body.
///
/// Layout: an H1 title, a `**Status:**` line, a mandatory `## Summary`
/// section, optional `## Highlights` / `## Risks` / `## Next steps`
/// sections (omitted entirely when empty), and a trailing italicised
/// metadata line.
pub fn render(doc: &ReportDocument) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# {}/{} — Status report ({} to {})\n\n",
        doc.owner,
        doc.name,
        doc.window_start.date_naive(),
        doc.window_end.date_naive(),
    ));
    out.push_str(&format!("**Status:** {}\n\n", status_label(doc.summary.status)));
    out.push_str("## Summary\n");
    out.push_str(&doc.summary.summary_text);
    out.push('\n');

    render_list("Highlights", &doc.summary.highlights, &mut out);
    render_list("Risks", &doc.summary.risks, &mut out);
    render_list("Next steps", &doc.summary.next_steps, &mut out);

    out.push_str(&format!(
        "\n*Generated {} by {} for window {} to {} (report {})*\n",
        doc.generated_at.to_rfc3339(),
        doc.model,
        doc.window_start.to_rfc3339(),
        doc.window_end.to_rfc3339(),
        doc.report_id,
    ));
    out
}

/// Writes rendered reports under `{base}/{owner}/{name}/`, maintaining a
/// rolling `latest.md` and an immutable dated snapshot per report.
#[derive(Debug, Clone)]
pub struct ReportSink {
    base_path: PathBuf,
}

impl ReportSink {
    /// Build a sink rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }

    fn repo_dir(&self, owner: &str, name: &str) -> PathBuf {
        self.base_path.join(owner).join(name)
    }

    /// Render `doc` and write both `latest.md` and the dated immutable
    /// snapshot, each via a temp-file-then-rename within the target
    /// directory so neither write is ever observed partially complete.
    #[instrument(skip(self, doc), fields(owner = %doc.owner, name = %doc.name))]
    pub async fn write_report(&self, doc: &ReportDocument) -> Result<(), GhStatusError> {
        let markdown = render(doc);
        let dir = self.repo_dir(&doc.owner, &doc.name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GhStatusError::Other(anyhow::anyhow!("creating report directory: {e}")))?;

        let latest = dir.join("latest.md");
        let snapshot = dir.join(format!(
            "{}-{}.md",
            doc.window_end.date_naive(),
            doc.report_id,
        ));

        write_atomically(&latest, &markdown).await?;
        write_atomically(&snapshot, &markdown).await?;
        Ok(())
    }
}

async fn write_atomically(path: &Path, contents: &str) -> Result<(), GhStatusError> {
    let dir = path.parent().ok_or_else(|| {
        GhStatusError::Other(anyhow::anyhow!("report path has no parent directory"))
    })?;
    let tmp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| GhStatusError::Other(anyhow::anyhow!("writing temp report file: {e}")))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| GhStatusError::Other(anyhow::anyhow!("renaming report file into place: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh_status_core::ids::ReportId;

    fn doc(summary: StatusSummary) -> ReportDocument {
        ReportDocument {
            report_id: ReportId::new(),
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            window_start: Utc::now() - chrono::Duration::days(7),
            window_end: Utc::now(),
            model: "heuristic".to_string(),
            generated_at: Utc::now(),
            summary,
        }
    }

    #[test]
    fn empty_sections_are_omitted() {
        let rendered = render(&doc(StatusSummary {
            status: ReportStatus::OnTrack,
            summary_text: "Shipped three commits.".to_string(),
            highlights: vec![],
            risks: vec![],
            next_steps: vec![],
            usage: None,
        }));
        assert!(!rendered.contains("## Highlights"));
        assert!(!rendered.contains("## Risks"));
        assert!(!rendered.contains("## Next steps"));
        assert!(rendered.contains("## Summary"));
        assert!(rendered.starts_with("# acme/widgets — Status report"));
    }

    #[test]
    fn populated_sections_render_as_bullet_lists() {
        let rendered = render(&doc(StatusSummary {
            status: ReportStatus::AtRisk,
            summary_text: "Slower week.".to_string(),
            highlights: vec!["Merged #42".to_string()],
            risks: vec!["CI flaky".to_string()],
            next_steps: vec!["Stabilise CI".to_string()],
            usage: None,
        }));
        assert!(rendered.contains("## Highlights\n- Merged #42\n"));
        assert!(rendered.contains("## Risks\n- CI flaky\n"));
        assert!(rendered.contains("## Next steps\n- Stabilise CI\n"));
    }

    #[tokio::test]
    async fn write_report_creates_latest_and_dated_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ReportSink::new(tmp.path());
        let document = doc(StatusSummary {
            status: ReportStatus::OnTrack,
            summary_text: "All good.".to_string(),
            highlights: vec![],
            risks: vec![],
            next_steps: vec![],
            usage: None,
        });

        sink.write_report(&document).await.unwrap();

        let latest_path = tmp.path().join("acme/widgets/latest.md");
        assert!(latest_path.exists());
        let contents = tokio::fs::read_to_string(&latest_path).await.unwrap();
        assert!(contents.contains("All good."));

        let snapshot_path = tmp.path().join(format!(
            "acme/widgets/{}-{}.md",
            document.window_end.date_naive(),
            document.report_id
        ));
        assert!(snapshot_path.exists());
    }
}
