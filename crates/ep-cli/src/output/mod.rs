//! Output formatting for the terminal
//!
//! Tables for planned and live members, a summary of a reconciliation
//! pass, and colored status lines.

use tabled::{settings::Style, Table, Tabled};

use ep_etcd::{ContainersState, LiveMember, Member, ReconcileReport};

/// Format the members of a plan as a table
///
/// `previous` decides the CHANGE column: members missing from it are
/// joining, deployed members whose container differs are updated.
pub fn format_plan<'a>(
    members: impl IntoIterator<Item = &'a Member>,
    previous: &ContainersState,
) -> String {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "PEER URL")]
        peer_url: String,
        #[tabled(rename = "MODE")]
        mode: &'static str,
        #[tabled(rename = "CHANGE")]
        change: &'static str,
    }

    let rows: Vec<PlanRow> = members
        .into_iter()
        .map(|m| PlanRow {
            name: m.name().to_string(),
            host: m.host().describe(),
            peer_url: m.peer_urls().join(","),
            mode: if m.is_new_cluster() { "new" } else { "existing" },
            change: match previous.get(m.name()) {
                None => "join",
                Some(deployed) if deployed != &m.to_host_configured_container() => "update",
                Some(_) => "-",
            },
        })
        .collect();

    if rows.is_empty() {
        return "No members configured".to_string();
    }

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the live membership as a table
pub fn format_live_members(members: &[LiveMember]) -> String {
    if members.is_empty() {
        return "No live members".to_string();
    }

    #[derive(Tabled)]
    struct LiveRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "PEER URLS")]
        peer_urls: String,
    }

    let rows: Vec<LiveRow> = members
        .iter()
        .map(|m| LiveRow {
            id: format!("{:x}", m.id),
            name: if m.name.is_empty() {
                "(unstarted)".to_string()
            } else {
                m.name.clone()
            },
            peer_urls: m.peer_urls.join(","),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// One line per membership change and failure
pub fn format_report(report: &ReconcileReport) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.extend(report.removed.iter().map(|name| format!("removed {}", name)));
    lines.extend(report.joined.iter().map(|name| format!("joined  {}", name)));
    lines.extend(
        report
            .failures
            .iter()
            .map(|(name, e)| format!("failed  {}: {}", name, e)),
    );
    if lines.is_empty() {
        lines.push("membership unchanged".to_string());
    }
    lines.join("\n")
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_colored(crossterm::style::Color::Green, "✓ ", msg);
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    print_colored(crossterm::style::Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    print_colored(crossterm::style::Color::Yellow, "! ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_colored(crossterm::style::Color::Cyan, "→ ", msg);
}

fn print_colored(color: crossterm::style::Color, prefix: &str, msg: &str) {
    use crossterm::style::{Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(color),
        Print(prefix),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
