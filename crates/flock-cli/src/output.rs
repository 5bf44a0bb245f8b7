use flock_core::orchestrator::{Outcome, RunRecord};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

/// One-line human description of an outcome's payload.
pub fn outcome_detail(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Pending => String::new(),
        Outcome::Failed { reason } => reason.clone(),
        Outcome::Succeeded { result } => ["html_url", "full_name", "id", "workflow"]
            .iter()
            .find_map(|k| match &result[*k] {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_default(),
    }
}

/// Per-target table for a run, in submission order.
pub fn print_run(run: &RunRecord) {
    let rows = run
        .entries()
        .map(|(t, o)| vec![t.id.clone(), o.label().to_string(), outcome_detail(o)])
        .collect();
    print_table(&["TARGET", "STATUS", "DETAIL"], rows);
}

pub fn print_summary(run: &RunRecord) {
    let c = run.counts();
    println!(
        "run {} ({}): {} succeeded, {} failed, {} pending",
        run.id, run.action, c.succeeded, c.failed, c.pending
    );
}
