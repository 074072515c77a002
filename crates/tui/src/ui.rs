use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use autopop_core::logger;
use autopop_core::session::Progress;
use autopop_core::types::SessionState;

use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0), Constraint::Length(9)])
        .split(chunks[0]);

    let state = app.session.state();
    draw_banner(f, left[0], state);
    draw_strategies(f, left[1], app, state);
    draw_progress(f, left[2], &app.session.progress());

    if app.log_visible && chunks.len() > 1 {
        draw_logs(f, chunks[1], app);
    }
    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn draw_banner(f: &mut Frame, area: Rect, state: SessionState) {
    let (label, bg) = match state {
        SessionState::Starting => ("STARTING...", Color::Yellow),
        SessionState::Running => ("RUNNING (x to abort)", Color::Green),
        SessionState::Aborting => ("ABORTING...", Color::Yellow),
        SessionState::Idle => ("IDLE (Enter to start)", Color::Red),
    };
    let width = area.width as usize;
    let pad = width.saturating_sub(label.len());
    let text = format!("{}{}{}", " ".repeat(pad / 2), label, " ".repeat(pad - pad / 2));
    let banner = Paragraph::new(Line::from(Span::styled(
        text,
        Style::default().fg(Color::Black).bg(bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, area);
}

fn key(k: &str) -> Span<'_> {
    Span::styled(k, Style::default().fg(Color::Yellow))
}

fn draw_strategies(f: &mut Frame, area: Rect, app: &App, state: SessionState) {
    let mut lines = vec![
        Line::from(vec![
            Span::raw(" "),
            key("j"),
            Span::raw("/"),
            key("k"),
            Span::raw(" select, "),
            key("enter"),
            Span::raw(" start, "),
            key("x"),
            Span::raw(" abort, "),
            key("l"),
            Span::raw(" logs, "),
            key("q"),
            Span::raw(" quit"),
        ]),
        Line::from(""),
    ];

    if app.entries.is_empty() {
        lines.push(Line::from(Span::styled(
            "  no strategies found under strategies/",
            Style::default().fg(Color::DarkGray),
        )));
    }

    let running = app.session.progress().strategy;
    for (i, entry) in app.entries.iter().enumerate() {
        let prefix = if i == app.selected { "> " } else { "  " };
        let is_live = state != SessionState::Idle && running.as_deref() == Some(entry.name.as_str());
        let marker = if is_live { "[▶]" } else { "[ ]" };

        let mut spans = vec![
            Span::raw(prefix),
            Span::styled(marker, Style::default().fg(if is_live { Color::Green } else { Color::DarkGray })),
            Span::raw(" "),
            Span::styled(entry.title.clone(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
            Span::styled(format!("  {} actions", entry.actions), Style::default().fg(Color::DarkGray)),
        ];
        if let Some(map) = &entry.map {
            spans.push(Span::styled(format!("  {}", map), Style::default().fg(Color::Cyan)));
        }
        lines.push(Line::from(spans));

        if let Some(err) = &entry.error {
            lines.push(Line::from(Span::styled(format!("    err: {}", err), Style::default().fg(Color::Red))));
        } else if !entry.description.is_empty() {
            lines.push(Line::from(Span::styled(
                format!("    {}", entry.description),
                Style::default().fg(Color::DarkGray),
            )));
        }
    }

    let list = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(list, area);
}

fn draw_progress(f: &mut Frame, area: Rect, p: &Progress) {
    let dim = Style::default().fg(Color::DarkGray);
    let value = Style::default().fg(Color::White);
    let row = |label: &'static str, text: String, style: Style| {
        Line::from(vec![Span::styled(format!(" {:<10}", label), dim), Span::styled(text, style)])
    };

    let lines = vec![
        row("strategy", p.strategy.clone().unwrap_or_else(|| "-".into()), value),
        row("action", p.current.clone().unwrap_or_else(|| "-".into()), Style::default().fg(Color::Yellow)),
        row("attempt", if p.attempt > 0 { p.attempt.to_string() } else { "-".into() }, value),
        row("score", p.last_score.map(|s| s.to_string()).unwrap_or_else(|| "-".into()), Style::default().fg(Color::Magenta)),
        row("money", p.money.map(|m| format!("${}", m)).unwrap_or_else(|| "-".into()), Style::default().fg(Color::Green)),
        row(
            "done",
            format!("{} confirmed, {} failed of {}", p.confirmed, p.failed, p.total),
            value,
        ),
        row("last run", p.outcome.clone().unwrap_or_else(|| "-".into()), value),
    ];

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Run ")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(panel, area);
}

fn draw_logs(f: &mut Frame, area: Rect, app: &App) {
    let visible = area.height.saturating_sub(2) as usize;
    let total = app.log_messages.len();
    let scroll = app.log_scroll.min(total.saturating_sub(visible));
    let start = total.saturating_sub(visible + scroll);
    let end = total.saturating_sub(scroll);
    let lines: Vec<Line> = app.log_messages[start..end].iter().map(|m| parse_log_line(m)).collect();

    let panel = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Logs ")
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(panel, area);
}

fn prefix_color(idx: u8) -> Color {
    match idx {
        logger::COLOR_GRAY => Color::DarkGray,
        logger::COLOR_BLUE => Color::LightBlue,
        logger::COLOR_GREEN => Color::LightGreen,
        logger::COLOR_MAGENTA => Color::LightMagenta,
        _ => Color::White,
    }
}

/// `level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage` into a colored line.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    let &[level, prefix, color, timestamp, message] = parts.as_slice() else {
        return Line::from(raw);
    };
    let color = prefix_color(color.parse().unwrap_or(0));

    let mut spans = vec![Span::styled(timestamp, Style::default().fg(Color::DarkGray)), Span::raw(" ")];
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }
    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(color)));
    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_lines_get_prefix_colors() {
        let line = parse_log_line("WARN\x1fretry\x1f1\x1f12:00:01\x1fattempt 2/3");
        let texts: Vec<&str> = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(texts, vec!["12:00:01", " ", "warn ", "retry", " ", "attempt 2/3"]);
        assert_eq!(line.spans[3].style.fg, Some(Color::DarkGray));

        let line = parse_log_line("INFO\x1fvision\x1f4\x1f12:00:02\x1fscore 91%");
        assert_eq!(line.spans.last().unwrap().style.fg, Some(Color::LightMagenta));
    }

    #[test]
    fn unstructured_lines_pass_through() {
        let line = parse_log_line("plain text");
        assert_eq!(line.spans.len(), 1);
    }
}
