//! Table output formatting for CLI commands, using comfy-table.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use crate::application::TaskHistory;
use crate::domain::models::{AgentDescriptor, AgentHealth, Escalation, TaskStatus};
use crate::services::resource_manager::ResourceSnapshot;
use crate::services::task_queue::QueueStats;

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(cells: &[&str]) -> Vec<Cell> {
    cells
        .iter()
        .map(|c| Cell::new(c).add_attribute(Attribute::Bold))
        .collect()
}

fn truncate_text(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        format!("{}...", &text[..max.saturating_sub(3)])
    }
}

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed | TaskStatus::EscalatedToHuman => Color::Red,
        TaskStatus::Abandoned => Color::DarkGrey,
        TaskStatus::Assigned | TaskStatus::Running | TaskStatus::AwaitingEvidence => Color::Cyan,
        TaskStatus::Pending | TaskStatus::Ready => Color::Yellow,
    }
}

fn health_color(health: AgentHealth) -> Color {
    match health {
        AgentHealth::Healthy => Color::Green,
        AgentHealth::Suspect => Color::Yellow,
        AgentHealth::Unresponsive => Color::Red,
        AgentHealth::Drained => Color::DarkGrey,
    }
}

/// Queue depth, per-status counts, and ledger totals.
pub fn render_status(stats: &QueueStats, snapshot: &ResourceSnapshot) -> String {
    let mut table = base_table();
    table.set_header(header(&["Status", "Count"]));
    let order = [
        TaskStatus::Pending,
        TaskStatus::Ready,
        TaskStatus::Assigned,
        TaskStatus::Running,
        TaskStatus::AwaitingEvidence,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Abandoned,
        TaskStatus::EscalatedToHuman,
    ];
    for status in order {
        let count = stats.counts.get(&status).copied().unwrap_or(0);
        table.add_row(vec![
            Cell::new(status.as_str()).fg(status_color(status)),
            Cell::new(count),
        ]);
    }

    let headroom = snapshot.headroom();
    format!(
        "{table}\n{} live task(s); reserved cpu={}c mem={}MB disk={}MB net={}Mbps; headroom cpu={}c mem={}MB\n",
        stats.live,
        snapshot.reserved.cpu_cores,
        snapshot.reserved.memory_mb,
        snapshot.reserved.disk_mb,
        snapshot.reserved.network_mbps,
        headroom.cpu_cores,
        headroom.memory_mb,
    )
}

/// Registered agents with health and load.
pub fn render_agents(agents: &[AgentDescriptor]) -> String {
    let mut table = base_table();
    table.set_header(header(&["ID", "Role", "Capabilities", "Load", "Health", "Weight"]));
    for agent in agents {
        let capabilities = agent
            .capabilities
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(&agent.id),
            Cell::new(agent.role.as_str()),
            Cell::new(truncate_text(&capabilities, 40)),
            Cell::new(format!("{}/{}", agent.current_load, agent.capacity)),
            Cell::new(agent.health.as_str()).fg(health_color(agent.health)),
            Cell::new(format!("{:.2}", agent.weight)),
        ]);
    }
    format!("{table}\n")
}

/// Escalation list.
pub fn render_escalations(escalations: &[Escalation]) -> String {
    let mut table = base_table();
    table.set_header(header(&["ID", "Task", "Agent", "Severity", "Cause", "Action", "Resolved"]));
    for e in escalations {
        table.add_row(vec![
            Cell::new(&e.id.to_string()[..8]),
            Cell::new(&e.task_id.to_string()[..8]),
            Cell::new(e.agent_id.as_deref().unwrap_or("-")),
            Cell::new(e.severity.as_str()),
            Cell::new(e.cause.as_str()),
            Cell::new(e.action.as_str()),
            Cell::new(if e.resolved { "yes" } else { "no" }),
        ]);
    }
    format!("{table}\n")
}

/// Full audit trail of one task.
pub fn render_history(history: &TaskHistory) -> String {
    let task = &history.task;
    let mut out = format!(
        "Task {} [{}] {}\n  kind={} priority={} reassignments={} escalations={}\n",
        task.id,
        task.status.as_str(),
        truncate_text(&task.title, 60),
        task.kind,
        task.priority,
        task.reassignment_count,
        task.escalation_count,
    );

    if !history.assignments.is_empty() {
        let mut table = base_table();
        table.set_header(header(&["Assignment", "Agent", "Status", "Progress", "Assigned at"]));
        for a in &history.assignments {
            table.add_row(vec![
                Cell::new(&a.id.to_string()[..8]),
                Cell::new(&a.agent_id),
                Cell::new(a.status.as_str()),
                Cell::new(format!("{}%", a.progress_pct)),
                Cell::new(a.assigned_at.to_rfc3339()),
            ]);
        }
        out.push_str(&format!("{table}\n"));
    }

    if !history.reports.is_empty() {
        let mut table = base_table();
        table.set_header(header(&["Report at", "Progress", "Valid", "Summary"]));
        for r in &history.reports {
            table.add_row(vec![
                Cell::new(r.timestamp.to_rfc3339()),
                Cell::new(format!("{}%", r.progress_pct)),
                Cell::new(if r.valid { "yes" } else { "no" }),
                Cell::new(truncate_text(&r.summary, 50)),
            ]);
        }
        out.push_str(&format!("{table}\n"));
    }

    if !history.escalations.is_empty() {
        out.push_str(&render_escalations(&history.escalations));
    }
    out
}
