//! `mailsync sync` — run one reconciliation cycle.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::{ColoredString, Colorize};
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use mailsync_core::{EntityKind, SyncConfig};
use mailsync_daemon::CycleRunner;
use mailsync_mailcow::record_label;
use mailsync_reconcile::{CycleReport, KindQueues, QueueCounts};

const SECRET_FIELDS: &[&str] = &["password", "password2"];
const REDACTED: &str = "********";

/// Arguments for `mailsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Compute and print the changes without applying them.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the cycle report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self, config: SyncConfig) -> Result<()> {
        mailsync_daemon::init_tracing(config.log_format);

        let runner = CycleRunner::new(&config).context("failed to set up backend client")?;
        let report = runner.run_cycle(self.dry_run);

        if self.json {
            print_json(&report)?;
        } else {
            print_table(&report);
        }

        if let Some(error) = report.error.as_deref() {
            bail!("sync failed: {error}");
        }
        Ok(())
    }
}

fn print_json(report: &CycleReport) -> Result<()> {
    let mut payload = serde_json::to_value(report).context("failed to serialize cycle report")?;
    redact_secrets(&mut payload);
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize cycle report")?
    );
    Ok(())
}

// Generated mailbox passwords travel in the plan; never print them.
fn redact_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if SECRET_FIELDS.contains(&key.as_str()) {
                    *v = Value::String(REDACTED.to_string());
                } else {
                    redact_secrets(v);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "add")]
    adds: String,
    #[tabled(rename = "update")]
    updates: String,
    #[tabled(rename = "kill")]
    kills: String,
}

fn count_rows(report: &CycleReport) -> Vec<CountRow> {
    EntityKind::all()
        .iter()
        .map(|kind| {
            let counts = report.counts.get(kind).copied().unwrap_or_default();
            count_row(*kind, counts)
        })
        .collect()
}

fn paint(n: usize, color: fn(&str) -> ColoredString) -> String {
    let text = n.to_string();
    if n == 0 {
        text.bright_black().to_string()
    } else {
        color(&text).to_string()
    }
}

fn count_row(kind: EntityKind, counts: QueueCounts) -> CountRow {
    CountRow {
        kind: kind.plural().to_string(),
        adds: paint(counts.adds, |s: &str| s.green()),
        updates: paint(counts.updates, |s: &str| s.yellow()),
        kills: paint(counts.kills, |s: &str| s.red()),
    }
}

fn print_table(report: &CycleReport) {
    let title = if report.dry_run {
        "Planned changes (dry run)"
    } else {
        "Changes"
    };
    println!("{}", title.bold());
    let mut table = Table::new(count_rows(report));
    table.with(Style::rounded());
    println!("{table}");

    if report.dry_run {
        for kind in EntityKind::all() {
            if let Some(queues) = report.plan.kind(*kind) {
                for line in plan_lines(*kind, queues) {
                    println!("{line}");
                }
            }
        }
    }

    match report.error.as_deref() {
        None if report.plan.is_empty() => println!("{}", "✓ everything up to date".green()),
        None if report.dry_run => println!("{}", "✓ nothing applied".green()),
        None => println!("{}", format!("✓ {} changes applied", report.applied).green()),
        Some(error) => println!("{}", format!("✗ {error}").red()),
    }
}

fn plan_lines(kind: EntityKind, queues: &KindQueues) -> Vec<String> {
    let mut lines = Vec::new();
    for id in &queues.kills {
        lines.push(format!("  -  {kind} {}", value_label(id)));
    }
    for record in &queues.adds {
        lines.push(format!("  +  {kind} {}", record_label(kind, record)));
    }
    for entry in &queues.updates {
        let items: Vec<String> = entry.items.iter().map(value_label).collect();
        let fields: Vec<&str> = entry.attr.keys().map(String::as_str).collect();
        lines.push(format!(
            "  ~  {kind} {} ({})",
            items.join(", "),
            fields.join(", ")
        ));
    }
    lines
}

fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
