//! Terminal rendering of tree status, FSM tables and reports.

use colored::Colorize;
use exectree_core::resolver::IN_PROGRESS_SUFFIX;
use exectree_core::{CompletionReport, FsmConfig, Status, TransitionKind};
use exectree_runtime::NodeStatus;
use std::fmt::Write;

/// One line per node, indented by depth.
pub fn status_table(rows: &[NodeStatus]) -> String {
    let name_width = rows
        .iter()
        .map(|r| r.depth * 2 + r.name.len())
        .max()
        .unwrap_or(0)
        .max(4);
    let state_width = rows
        .iter()
        .map(|r| r.state.as_str().len())
        .max()
        .unwrap_or(0)
        .max(5);

    let mut out = format!(
        "{:<nw$}  {:<sw$}  {:<12}  {}",
        "NODE",
        "STATE",
        "LAST",
        "FLAGS",
        nw = name_width,
        sw = state_width
    )
    .bold()
    .to_string();

    for row in rows {
        let name = format!("{}{}", "  ".repeat(row.depth), row.name);
        let name = format!("{:<w$}", name, w = name_width);
        let state = format!("{:<w$}", row.state.as_str(), w = state_width);
        let state = if row.state.as_str().ends_with(IN_PROGRESS_SUFFIX) {
            state.yellow()
        } else {
            state.green()
        };
        let last = format!("{:<12}", row.last_command.as_deref().unwrap_or("-"));

        let mut flags = Vec::new();
        if let Some(active) = &row.active {
            flags.push(format!("running '{}'", active).cyan().to_string());
        }
        if !row.consistent {
            flags.push("inconsistent".red().to_string());
        }
        if !row.included {
            flags.push("excluded".dimmed().to_string());
        }
        if row.leaf {
            flags.push("leaf".dimmed().to_string());
        }

        let name = if row.included {
            name.normal()
        } else {
            name.dimmed()
        };
        let _ = write!(out, "\n{}  {}  {}  {}", name, state, last, flags.join(" "));
    }
    out
}

/// Resolved transitions of one node.
pub fn fsm_table(config: &FsmConfig, depth: usize) -> String {
    let indent = "  ".repeat(depth);
    let mut out = format!(
        "{}{} (initial: {}, checksum: {}{})",
        indent,
        config.node.bold(),
        config.initial.as_str().cyan(),
        config.checksum,
        if config.included { "" } else { ", excluded" }
    );

    let width = config
        .transitions
        .iter()
        .map(|t| t.trigger.len())
        .max()
        .unwrap_or(0);
    for t in &config.transitions {
        let kind = match t.kind {
            TransitionKind::Direct => "direct".normal(),
            TransitionKind::Begin => "begin".yellow(),
            TransitionKind::End => "end".yellow(),
        };
        let _ = write!(
            out,
            "\n{}  {:<w$}  {} -> {}  [{}]",
            indent,
            t.trigger,
            t.source,
            t.dest,
            kind,
            w = width
        );
    }
    out
}

pub fn report_line(report: &CompletionReport) -> String {
    let status = match &report.status {
        Status::Success => report.status.to_string().green(),
        Status::Failed { .. } => report.status.to_string().red(),
        Status::Timeout { .. } => report.status.to_string().yellow(),
    };
    format!(
        "{} '{}' -> {} [{}] in {}ms",
        report.node.bold(),
        report.trigger,
        report.final_state.as_str().cyan(),
        status,
        report.elapsed_ms
    )
}
