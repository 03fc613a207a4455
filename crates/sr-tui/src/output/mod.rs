//! Output formatting for the terminal
//!
//! Everything here turns client state into plain text: the interactive
//! screen is a list of lines drawn from a [`Snapshot`], and the headless
//! subcommands print tables built with `tabled`.

use tabled::{settings::Style, Table, Tabled};

use sr_client::Snapshot;
use sr_core::{ConnectionStatus, Latency, Server};

/// Keys shown in the footer
pub const HELP_LINE: &str =
    "q:Quit c:Connect d:Disconnect r:Load s:Sub t:Test u:TUN f:Refresh ↑↓:Select";

/// Rows of the traffic chart
const CHART_HEIGHT: usize = 5;

/// Activity lines kept on screen
const ACTIVITY_ROWS: usize = 6;

/// Inbound/outbound rows in the connections section
const CONNECTION_ROWS: usize = 6;

/// Format a byte count with 1024-based units
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let value = bytes as f64;
    if value < KB {
        format!("{} B", bytes)
    } else if value < MB {
        format!("{:.1} KB", value / KB)
    } else if value < GB {
        format!("{:.2} MB", value / MB)
    } else {
        format!("{:.2} GB", value / GB)
    }
}

/// Format a transfer rate with 1024-based units
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes_per_sec < KB {
        format!("{:.0} B/s", bytes_per_sec)
    } else if bytes_per_sec < MB {
        format!("{:.1} KB/s", bytes_per_sec / KB)
    } else if bytes_per_sec < GB {
        format!("{:.2} MB/s", bytes_per_sec / MB)
    } else {
        format!("{:.2} GB/s", bytes_per_sec / GB)
    }
}

/// Hide most of a server address.
///
/// IPv4 keeps the first two octets, IPv6 the first two groups, and host
/// names everything but the last two labels.
pub fn mask_address(address: &str) -> String {
    let labels: Vec<&str> = address.split('.').collect();
    if labels.len() == 4 && labels.iter().all(|l| l.parse::<u8>().is_ok()) {
        return format!("{}.{}.*.*", labels[0], labels[1]);
    }

    let groups: Vec<&str> = address.split(':').collect();
    if groups.len() > 2 {
        return format!("{}:{}:***", groups[0], groups[1]);
    }

    match labels.len() {
        0 | 1 => {}
        2 => return format!("{}.***", labels[0]),
        n => return format!("{}.***", labels[..n - 2].join(".")),
    }

    let chars: Vec<char> = address.chars().collect();
    if chars.len() > 6 {
        let kept: String = chars[..chars.len() - 4].iter().collect();
        format!("{}****", kept)
    } else {
        address.to_string()
    }
}

/// Hide the last two segments of an IP address
pub fn mask_ip(ip: &str) -> String {
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() == 4 {
        return format!("{}.{}.*.*", octets[0], octets[1]);
    }
    let mut groups: Vec<&str> = ip.split(':').collect();
    if groups.len() >= 2 {
        let n = groups.len();
        groups[n - 1] = "****";
        groups[n - 2] = "****";
        return groups.join(":");
    }
    ip.to_string()
}

/// Latency suffix for a server line
pub fn latency_marker(latency: Latency) -> String {
    match latency {
        Latency::Measured(ms) => format!(" [{}ms]", ms),
        Latency::TimedOut => " [timeout]".to_string(),
        Latency::Untested => String::new(),
    }
}

/// Cut `s` to at most `max` characters, marking the cut with `...`
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

fn status_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Disconnected => "○ Disconnected",
        ConnectionStatus::Connecting => "◐ Connecting",
        ConnectionStatus::Connected => "● Connected",
        ConnectionStatus::Disconnecting => "◑ Disconnecting",
    }
}

fn server_label(server: &Server) -> String {
    if server.name.is_empty() {
        format!("{}:{}", mask_address(&server.address), server.port)
    } else {
        server.name.clone()
    }
}

/// Bar chart of download rates, oldest sample on the left.
///
/// The top row carries the scale. An empty history draws flat rules.
pub fn traffic_chart(history: &[f64], width: usize, height: usize) -> Vec<String> {
    let width = width.max(10);
    let height = height.max(3);

    if history.is_empty() {
        return vec!["─".repeat(width); height];
    }

    let max = history.iter().copied().fold(1.0_f64, f64::max);
    let mut grid = vec![vec!['·'; width]; height];

    for col in 0..width {
        let idx = (col * history.len() / width).min(history.len() - 1);
        let bar = ((history[idx] / max) * (height - 1) as f64) as usize;
        for h in 0..=bar.min(height - 1) {
            grid[height - 1 - h][col] = '█';
        }
    }

    let mut lines: Vec<String> = grid.into_iter().map(|row| row.into_iter().collect()).collect();
    let scale = format_speed(max);
    let dots = width.saturating_sub(scale.chars().count());
    lines[0] = format!("{}{}", scale, "·".repeat(dots));
    lines
}

/// Interactive-screen state that is not part of the client state
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub width: u16,
    pub height: u16,
    /// Subscription URL being typed, if the prompt is open
    pub input: Option<String>,
}

/// Lay out the whole interactive screen
pub fn render_screen(snapshot: &Snapshot, view: &ViewState) -> Vec<String> {
    let width = usize::from(view.width.max(40));
    let height = usize::from(view.height.max(20));
    let mut lines = Vec::with_capacity(height);

    lines.push(" SuperRay TUI".to_string());
    lines.push(String::new());

    let mut status = format!(
        " {} | {} | Port: {}",
        status_label(snapshot.status),
        snapshot.routing_mode.label(),
        snapshot.local_port
    );
    if snapshot.status == ConnectionStatus::Connected {
        let totals = snapshot.totals;
        status.push_str(&format!(
            " | Traffic: ↑{} ↓{} Σ{}",
            format_bytes(totals.upload),
            format_bytes(totals.download),
            format_bytes(totals.upload.saturating_add(totals.download))
        ));
        if snapshot.routing_active {
            status.push_str(" | routing on");
        }
    }
    lines.push(status);
    lines.extend(server_section(snapshot));
    lines.push(String::new());

    lines.push(format!(
        " ↑ {}  ↓ {}",
        format_speed(snapshot.rate.upload_bytes_per_sec),
        format_speed(snapshot.rate.download_bytes_per_sec)
    ));
    for row in traffic_chart(&snapshot.download_history, width.saturating_sub(2), CHART_HEIGHT) {
        lines.push(format!(" {}", row));
    }
    lines.push(String::new());

    if snapshot.status == ConnectionStatus::Connected && !snapshot.connections.is_empty() {
        lines.extend(connections_section(snapshot));
        lines.push(String::new());
    }

    // Footer: blank, activity header, activity rows, prompt/help
    let reserved = lines.len() + ACTIVITY_ROWS + 4;
    let list_rows = height.saturating_sub(reserved).max(3);
    lines.extend(server_list(snapshot, list_rows));
    lines.push(String::new());

    lines.push(" Activity".to_string());
    let activity = &snapshot.activity;
    let start = activity.len().saturating_sub(ACTIVITY_ROWS);
    for line in &activity[start..] {
        lines.push(format!(" {}", line));
    }

    match &view.input {
        Some(input) => lines.push(format!(" Subscription URL: {}_  (Enter to save, Esc to cancel)", input)),
        None => lines.push(format!(" {}", HELP_LINE)),
    }

    lines.into_iter().map(|line| truncate(&line, width)).collect()
}

fn server_section(snapshot: &Snapshot) -> Vec<String> {
    let mut lines = Vec::new();
    let active = snapshot.active_server.as_ref();
    let selected = snapshot.selected();

    let Some(display) = active.or(selected) else {
        lines.push(" No server selected (press s to add a subscription)".to_string());
        return lines;
    };

    let mark = if active.is_some() { " ✓" } else { "" };
    lines.push(format!(" Server: {}{}", server_label(display), mark));
    lines.push(format!(
        " Addr: {}:{} {}",
        mask_address(&display.address),
        display.port,
        display.protocol.to_uppercase()
    ));

    if snapshot.selection_pending() {
        if let Some(selected) = selected {
            lines.push(format!(
                " Selected: {} (press c to switch)",
                server_label(selected)
            ));
        }
    }

    // GeoIP always describes the selected entry
    if let Some(geo) = snapshot.geo.as_ref().filter(|g| g.is_success()) {
        let mut parts = Vec::new();
        if !geo.query.is_empty() {
            parts.push(format!("IP: {}", mask_ip(&geo.query)));
        }
        if !geo.as_number.is_empty() {
            parts.push(format!("ASN: {}", geo.as_number));
        }
        let location = geo.format_location();
        if !location.is_empty() {
            parts.push(location);
        }
        let org = geo.format_org();
        if !org.is_empty() {
            parts.push(org.to_string());
        }
        if !parts.is_empty() {
            lines.push(format!(" GeoIP: {}", parts.join(" | ")));
        }
    }
    lines
}

/// Bytes moved per engine inbound and outbound
fn connections_section(snapshot: &Snapshot) -> Vec<String> {
    let mut lines = vec![format!(
        " Connections  {:<16} {:<9} {:>10} {:>10}",
        "TAG", "TYPE", "UPLOAD", "DOWNLOAD"
    )];
    for conn in snapshot.connections.iter().take(CONNECTION_ROWS) {
        lines.push(format!(
            "              {:<16} {:<9} {:>10} {:>10}",
            truncate(&conn.tag, 16),
            conn.direction,
            format_bytes(conn.counters.upload),
            format_bytes(conn.counters.download)
        ));
    }
    let hidden = snapshot.connections.len().saturating_sub(CONNECTION_ROWS);
    if hidden > 0 {
        lines.push(format!("              (+{} more)", hidden));
    }
    lines
}

/// Server list scrolled so the selection stays visible
fn server_list(snapshot: &Snapshot, rows: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let header = if snapshot.probe_running {
        format!(" Servers ({}) testing...", snapshot.servers.len())
    } else {
        format!(" Servers ({})", snapshot.servers.len())
    };
    lines.push(header);

    if snapshot.servers.is_empty() {
        lines.push("   (empty, press r to load)".to_string());
        return lines;
    }

    let visible = rows.saturating_sub(1).max(1);
    let selected = snapshot.selected_index.unwrap_or(0);
    let first = selected.saturating_sub(visible - 1).min(snapshot.servers.len().saturating_sub(visible));
    let active_key = snapshot.active_server.as_ref().map(Server::key);

    for (i, server) in snapshot.servers.iter().enumerate().skip(first).take(visible) {
        let cursor = if Some(i) == snapshot.selected_index { '>' } else { ' ' };
        let active = if active_key.as_ref() == Some(&server.key()) { '*' } else { ' ' };
        lines.push(format!(
            " {}{} [{}] {}{}",
            cursor,
            active,
            server.protocol.to_uppercase(),
            server_label(server),
            latency_marker(server.latency)
        ));
    }
    lines
}

/// Server catalog as a table for headless output
pub fn format_servers(servers: &[Server], active: Option<&Server>) -> String {
    if servers.is_empty() {
        return "No servers in catalog".to_string();
    }

    #[derive(Tabled)]
    struct ServerRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "PROTOCOL")]
        protocol: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "LATENCY")]
        latency: String,
    }

    let active_key = active.map(Server::key);
    let rows: Vec<ServerRow> = servers
        .iter()
        .enumerate()
        .map(|(i, s)| ServerRow {
            index: i + 1,
            name: {
                let name = truncate(&server_label(s), 32);
                if active_key.as_ref() == Some(&s.key()) {
                    format!("{} *", name)
                } else {
                    name
                }
            },
            protocol: s.protocol.to_uppercase(),
            address: format!("{}:{}", mask_address(&s.address), s.port),
            latency: s.latency.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_client::ClientState;
    use sr_core::config::ClientConfig;

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_format_speed_units() {
        assert_eq!(format_speed(0.0), "0 B/s");
        assert_eq!(format_speed(500.0), "500 B/s");
        assert_eq!(format_speed(2048.0), "2.0 KB/s");
        assert_eq!(format_speed(1.5 * 1024.0 * 1024.0), "1.50 MB/s");
    }

    #[test]
    fn test_mask_address() {
        assert_eq!(mask_address("203.0.113.45"), "203.0.*.*");
        assert_eq!(mask_address("2001:db8:85a3::7334"), "2001:db8:***");
        assert_eq!(mask_address("jp1.edge.example.com"), "jp1.edge.***");
        assert_eq!(mask_address("example.com"), "example.***");
        assert_eq!(mask_address("localhost-proxy"), "localhost-p****");
        assert_eq!(mask_address("proxy"), "proxy");
    }

    #[test]
    fn test_mask_ip() {
        assert_eq!(mask_ip("192.168.1.100"), "192.168.*.*");
        assert_eq!(mask_ip("2001:db8::1"), "2001:db8:****:****");
    }

    #[test]
    fn test_latency_marker() {
        assert_eq!(latency_marker(Latency::Measured(45)), " [45ms]");
        assert_eq!(latency_marker(Latency::TimedOut), " [timeout]");
        assert_eq!(latency_marker(Latency::Untested), "");
    }

    #[test]
    fn test_truncate_is_char_aware() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("東京サーバー01", 6), "東京サ...");
    }

    #[test]
    fn test_empty_chart_is_flat() {
        let chart = traffic_chart(&[], 12, 3);
        assert_eq!(chart.len(), 3);
        assert!(chart.iter().all(|row| row == &"─".repeat(12)));
    }

    #[test]
    fn test_chart_scales_to_peak() {
        let chart = traffic_chart(&[0.0, 1024.0, 2048.0], 12, 4);
        assert_eq!(chart.len(), 4);
        assert!(chart[0].starts_with("2.0 KB/s"));
        assert_eq!(chart[0].chars().count(), 12);
        // Bottom row is filled everywhere, the peak reaches the top
        assert!(chart[3].chars().all(|c| c == '█'));
        assert!(chart[1].ends_with('█'));
    }

    #[test]
    fn test_render_shows_pending_selection() {
        let state = ClientState::new(ClientConfig::default());
        state.update(|shared| {
            shared.catalog.replace(vec![
                Server::new("Tokyo", "vmess", "203.0.113.10", 443),
                Server::new("Osaka", "trojan", "203.0.113.11", 443),
            ]);
            let (attempt, _) = shared.session.begin_connect().unwrap();
            let tokyo = shared.catalog.get(0).cloned().unwrap();
            shared
                .session
                .finish_connect(attempt, tokyo, sr_core::SessionHandle("s".into()));
            shared.catalog.select(1).unwrap();
        });

        let view = ViewState {
            width: 100,
            height: 40,
            input: None,
        };
        let lines = render_screen(&state.snapshot(), &view);
        assert!(lines.iter().any(|l| l.contains("● Connected | SOCKS5 | Port: 10808")));
        assert!(lines.iter().any(|l| l.contains("Server: Tokyo ✓")));
        assert!(lines.iter().any(|l| l.contains("Addr: 203.0.*.*:443 VMESS")));
        assert!(lines.iter().any(|l| l.contains("Selected: Osaka (press c to switch)")));
        assert!(lines.iter().any(|l| l.contains(">  [TROJAN] Osaka")));
        assert!(lines.iter().any(|l| l.contains(" * [VMESS] Tokyo")));
        assert!(lines.last().unwrap().contains("q:Quit"));
    }

    #[test]
    fn test_render_connections_while_connected() {
        use sr_core::traits::{TagCounters, TagDirection, TrafficCounters};

        let state = ClientState::new(ClientConfig::default());
        let tag = |name: &str, direction, upload, download| TagCounters {
            tag: name.to_string(),
            direction,
            counters: TrafficCounters { upload, download },
        };
        state.update(|shared| {
            shared.catalog.replace(vec![Server::new("Tokyo", "vmess", "203.0.113.10", 443)]);
            shared.telemetry.connections = vec![
                tag("socks-in", TagDirection::Inbound, 1536, 2048),
                tag("proxy", TagDirection::Outbound, 1024, 5 * 1024 * 1024),
            ];
        });
        let view = ViewState {
            width: 100,
            height: 40,
            input: None,
        };

        // Stale counters are not shown while disconnected
        let lines = render_screen(&state.snapshot(), &view);
        assert!(!lines.iter().any(|l| l.contains("Connections")));

        state.update(|shared| {
            let (attempt, _) = shared.session.begin_connect().unwrap();
            let tokyo = shared.catalog.get(0).cloned().unwrap();
            shared
                .session
                .finish_connect(attempt, tokyo, sr_core::SessionHandle("s".into()));
        });
        let lines = render_screen(&state.snapshot(), &view);
        let header = lines.iter().position(|l| l.contains("Connections")).unwrap();
        assert!(lines[header].contains("DOWNLOAD"));
        assert!(lines[header + 1].contains("socks-in"));
        assert!(lines[header + 1].contains("inbound"));
        assert!(lines[header + 1].contains("1.5 KB"));
        assert!(lines[header + 2].contains("proxy"));
        assert!(lines[header + 2].contains("outbound"));
        assert!(lines[header + 2].contains("5.00 MB"));
    }

    #[test]
    fn test_render_prompt_replaces_help() {
        let state = ClientState::new(ClientConfig::default());
        let view = ViewState {
            width: 80,
            height: 30,
            input: Some("https://sub".into()),
        };
        let lines = render_screen(&state.snapshot(), &view);
        assert!(lines.iter().any(|l| l.contains("No server selected")));
        assert!(lines.last().unwrap().contains("Subscription URL: https://sub_"));
        assert!(lines.iter().all(|l| l.chars().count() <= 80));
    }

    #[test]
    fn test_format_servers_table() {
        let mut tokyo = Server::new("Tokyo", "vmess", "203.0.113.10", 443);
        tokyo.latency = Latency::Measured(45);
        let osaka = Server::new("Osaka", "ss", "203.0.113.11", 8388);

        let table = format_servers(&[tokyo.clone(), osaka], Some(&tokyo));
        assert!(table.contains("NAME"));
        assert!(table.contains("Tokyo *"));
        assert!(table.contains("45ms"));
        assert!(table.contains("203.0.*.*:8388"));
        assert_eq!(format_servers(&[], None), "No servers in catalog");
    }
}
