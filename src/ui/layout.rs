use {
    super::renderer::{format_count, summary_rows},
    crate::aggregate::GuildSnapshot,
    ratatui::{
        layout::{Constraint, Direction, Layout as RatLayout, Rect},
        style::{Color, Modifier, Style},
        text::{Line, Span},
        widgets::{Block, Borders, Gauge, Paragraph, Row, Table},
        Frame,
    },
};

/// Render the live dashboard
pub fn render_layout(f: &mut Frame, area: Rect, snapshot: &GuildSnapshot) {
    let chunks = RatLayout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Shard gauge
            Constraint::Min(0),    // Stats table
            Constraint::Length(3), // Footer/Status
        ])
        .split(area);

    render_header(f, chunks[0]);
    render_shard_gauge(f, chunks[1], snapshot);
    render_stats_table(f, chunks[2], snapshot);
    render_footer(f, chunks[3], snapshot);
}

fn render_header(f: &mut Frame, area: Rect) {
    let header = Block::default().borders(Borders::ALL).title("dstat");

    let text = vec![Line::from(vec![
        Span::styled("dstat", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" - Waiting for every shard to report its guilds (q/Esc hides this view)"),
    ])];

    f.render_widget(Paragraph::new(text).block(header), area);
}

fn render_shard_gauge(f: &mut Frame, area: Rect, snapshot: &GuildSnapshot) {
    let total = snapshot.expected_shards.max(1);
    let done = snapshot.completed_shards();
    let ratio = (done as f64 / total as f64).clamp(0.0, 1.0);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Shards"))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio)
        .label(format!("{}/{} complete", done, snapshot.expected_shards));

    f.render_widget(gauge, area);
}

fn render_stats_table(f: &mut Frame, area: Rect, snapshot: &GuildSnapshot) {
    let header = Row::new(vec!["Statistic", "Value"])
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = summary_rows(snapshot)
        .into_iter()
        .map(|(label, value)| {
            let style = if label == "Unavailable Guilds" && value > 0 {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            Row::new(vec![label.to_string(), format_count(value)]).style(style)
        })
        .collect();

    let widths = [Constraint::Length(20), Constraint::Length(16)];

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Guild Statistics"));

    f.render_widget(table, area);
}

fn render_footer(f: &mut Frame, area: Rect, snapshot: &GuildSnapshot) {
    let text = vec![Line::from(vec![
        Span::styled("Pending: ", Style::default().fg(Color::Cyan)),
        Span::raw(snapshot.pending_shards().to_string()),
        Span::raw(" | "),
        Span::styled("Timed out: ", Style::default().fg(Color::Cyan)),
        Span::raw(snapshot.timed_out_shards.to_string()),
        Span::raw(" | "),
        Span::styled("Failed: ", Style::default().fg(Color::Cyan)),
        Span::raw(snapshot.failed_shards.to_string()),
    ])];

    let footer = Block::default().borders(Borders::ALL).title("Status");

    f.render_widget(Paragraph::new(text).block(footer), area);
}
