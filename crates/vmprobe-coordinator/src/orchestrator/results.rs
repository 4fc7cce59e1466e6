//! End-of-run summary table

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

use super::types::RunReport;

/// Build the summary table (one row per target, in report order)
pub fn summary_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Target"),
            Cell::new("Phase"),
            Cell::new("Steps"),
            Cell::new("Verdict"),
        ]);

    for target in &report.targets {
        let passed = target.results.iter().filter(|r| r.success).count();
        let steps = format!("{passed}/{}", target.results.len());
        let verdict = if target.passed() {
            Cell::new("PASS").fg(Color::Green)
        } else {
            Cell::new("FAIL").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&target.name),
            Cell::new(target.phase),
            Cell::new(&steps),
            verdict,
        ]);
    }
    table
}

/// Print a summary table of the run to stdout
pub fn print_results_summary(report: &RunReport) {
    if report.targets.is_empty() {
        return;
    }
    println!("\n=== Results ===\n");
    println!("{}", summary_table(report));
}
