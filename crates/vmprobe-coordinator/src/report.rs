//! Run report files
//!
//! `render_html` is a pure function of the run report: the only timestamp
//! it embeds is the report's own finish time, so identical input yields
//! identical output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;
use vmprobe_common::defaults::REPORT_FILE_PREFIX;
use vmprobe_common::{LOG_TIMESTAMP_FORMAT, REPORT_STAMP_FORMAT};

use crate::orchestrator::RunReport;

/// Escape text for HTML element content and attribute values
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Render the run report as a self-contained HTML document
pub fn render_html(report: &RunReport, title: &str) -> String {
    let title = escape_html(title);
    let generated = report.finished_at.format(LOG_TIMESTAMP_FORMAT);

    let mut html = Vec::new();
    html.push(format!(
        "<html><head><meta charset=\"utf-8\"><title>{title}</title></head><body>"
    ));
    html.push(format!("<h1>{title}</h1>"));
    html.push(format!("<p>Generated: {generated}</p>"));
    if report.aborted {
        html.push("<p><b style='color:red'>Run interrupted by user</b></p>".to_string());
    }

    for target in &report.targets {
        html.push(format!(
            "<h2>{} ({})</h2>",
            escape_html(&target.name),
            target.phase
        ));
        html.push("<ul>".to_string());
        for result in &target.results {
            let color = if result.success { "green" } else { "red" };
            html.push(format!(
                "<li><b>{}</b>: <span style='color:{color}'>{}</span>",
                escape_html(&result.description),
                result.verdict()
            ));
            html.push("<details><summary>Details</summary>".to_string());
            html.push(format!(
                "<pre>STDOUT:\n{}\nSTDERR:\n{}</pre>",
                escape_html(&result.stdout),
                escape_html(&result.stderr)
            ));
            html.push("</details></li>".to_string());
        }
        html.push("</ul>".to_string());
    }
    html.push("</body></html>".to_string());
    html.join("\n")
}

/// File name of the HTML report for `report`
pub fn html_report_name(report: &RunReport) -> String {
    format!(
        "{REPORT_FILE_PREFIX}_{}.html",
        report.finished_at.format(REPORT_STAMP_FORMAT)
    )
}

/// Write the HTML report into `dir` (created if missing) and return its path
pub fn write_html_report(report: &RunReport, dir: &Path, title: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create reports directory: {}", dir.display()))?;
    let path = dir.join(html_report_name(report));
    std::fs::write(&path, render_html(report, title))
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "HTML report written");
    Ok(path)
}

/// Write the run report as pretty JSON to `path`
pub fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    let output = serde_json::json!({
        "written_at": chrono::Local::now().to_rfc3339(),
        "success": report.all_passed(),
        "exit_code": report.exit_code(),
        "run": report,
    });
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&output)?)
        .with_context(|| format!("Failed to write results to {}", path.display()))?;
    info!(path = %path.display(), "Results written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::TargetReport;
    use chrono::{Local, TimeZone};
    use proptest::prelude::*;
    use tempfile::TempDir;
    use vmprobe_common::{RunResult, TargetPhase};

    fn sample(aborted: bool) -> RunReport {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        RunReport {
            started_at: at,
            finished_at: at,
            aborted,
            targets: vec![
                TargetReport {
                    name: "alpha".to_string(),
                    phase: TargetPhase::Completed,
                    results: vec![
                        RunResult::from_exit("vagrant up", 0, "booted", ""),
                        RunResult::from_exit("test.py", 0, "all <ok>", ""),
                    ],
                },
                TargetReport {
                    name: "beta".to_string(),
                    phase: TargetPhase::Failed,
                    results: vec![RunResult::from_exit("vagrant up", 1, "", "box & disk missing")],
                },
            ],
        }
    }

    #[test]
    fn test_render_html_content() {
        let html = render_html(&sample(false), "Rocky 9 Variations Test Report");
        assert!(html.starts_with("<html><head>"));
        assert!(html.contains("<h1>Rocky 9 Variations Test Report</h1>"));
        assert!(html.contains("<p>Generated: 2024-03-09 14:05:07</p>"));
        assert!(html.contains("<h2>alpha (Completed)</h2>"));
        assert!(html.contains("<b>vagrant up</b>: <span style='color:green'>PASS</span>"));
        assert!(html.contains("<span style='color:red'>FAIL</span>"));
        assert!(html.contains("STDOUT:\nall &lt;ok&gt;\nSTDERR:\n"));
        assert!(html.contains("box &amp; disk missing"));
        assert!(!html.contains("interrupted"));
        assert!(html.find("alpha").unwrap() < html.find("beta").unwrap());
    }

    #[test]
    fn test_render_html_is_deterministic() {
        let report = sample(true);
        assert_eq!(render_html(&report, "t"), render_html(&report, "t"));
        assert!(render_html(&report, "t").contains("Run interrupted by user"));
    }

    #[test]
    fn test_write_html_report() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("reports");
        let path = write_html_report(&sample(false), &dir, "Title").unwrap();
        assert_eq!(
            path.file_name().unwrap(),
            "variation_test_report_2024-03-09_14-05-07.html"
        );
        assert!(std::fs::read_to_string(path).unwrap().contains("<h1>Title</h1>"));
    }

    #[test]
    fn test_write_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/results.json");
        write_json(&sample(false), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["exit_code"], 1);
        assert_eq!(value["run"]["targets"][0]["name"], "alpha");
        assert_eq!(value["run"]["targets"][1]["phase"], "Failed");
        assert_eq!(
            value["run"]["targets"][1]["results"][0]["stderr"],
            "box & disk missing"
        );
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"x\">'&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    proptest! {
        #[test]
        fn prop_escaped_text_has_no_markup(text in any::<String>()) {
            let escaped = escape_html(&text);
            prop_assert!(!escaped.contains('<'));
            prop_assert!(!escaped.contains('>'));
            prop_assert!(!escaped.contains('"'));
        }
    }
}
