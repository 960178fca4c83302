use crate::{
    app::{
        AppSnapshot,
        LayoutView,
        ReelView,
    },
    effects::format_amount,
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEvent,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use futures::StreamExt;
use itertools::Itertools;
use ratatui::{
    prelude::*,
    widgets::*,
};
use reel_engine::{
    coordinator::DisplayPhase,
    effects::WinTier,
    queue::{
        SpinRequest,
        SpinStatus,
    },
};
use std::io::stdout;
use unicode_width::UnicodeWidthStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Redraw,
    Spin,
    BetUp,
    BetDown,
    LinesUp,
    LinesDown,
    SelectPrev,
    SelectNext,
    Replay,
    ForceStop,
    RetryLayout,
}

#[derive(Default)]
pub struct UiState {
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

pub type InputEvents = EventStream;

pub fn input_event_stream() -> InputEvents {
    EventStream::new()
}

pub async fn next_raw_event(events: &mut InputEvents) -> Result<Event> {
    match events.next().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input closed")),
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    // Create a single persistent Terminal to preserve buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub fn interpret_event(event: Event) -> Option<UserEvent> {
    match event {
        Event::Key(key) => interpret_key(key),
        Event::Resize(..) => Some(UserEvent::Redraw),
        _ => None,
    }
}

pub fn interpret_key(key: KeyEvent) -> Option<UserEvent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }
    let event = match key.code {
        KeyCode::Char(' ') => UserEvent::Spin,
        KeyCode::Char('+') | KeyCode::Char('=') => UserEvent::BetUp,
        KeyCode::Char('-') => UserEvent::BetDown,
        KeyCode::Char(']') => UserEvent::LinesUp,
        KeyCode::Char('[') => UserEvent::LinesDown,
        KeyCode::Up | KeyCode::Char('k') => UserEvent::SelectPrev,
        KeyCode::Down | KeyCode::Char('j') => UserEvent::SelectNext,
        KeyCode::Char('r') => UserEvent::Replay,
        KeyCode::Char('x') => UserEvent::ForceStop,
        KeyCode::Char('l') => UserEvent::RetryLayout,
        KeyCode::Char('q') | KeyCode::Esc => UserEvent::Quit,
        _ => return None,
    };
    Some(event)
}

/// Glyph drawn beside a reel to suggest motion; longer for faster reels.
pub fn blur(velocity: f64) -> &'static str {
    match velocity.abs() {
        v if v < 0.5 => "",
        v if v < 8.0 => "·",
        v if v < 20.0 => "░",
        v if v < 35.0 => "▒",
        _ => "▓",
    }
}

fn ui(f: &mut Frame, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // machine header
            Constraint::Length(9),  // reels
            Constraint::Length(3),  // bet
            Constraint::Min(8),     // queue + history
            Constraint::Length(8),  // status
            Constraint::Length(3),  // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    draw_reels(f, chunks[1], snap);
    draw_bet(f, chunks[2], snap);
    draw_lower(f, chunks[3], snap);
    draw_status(f, chunks[4], snap);
    draw_help(f, chunks[5], snap);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let (text, style) = match &snap.layout {
        LayoutView::Unavailable(reason) => (
            format!("UNAVAILABLE: {reason} (l to retry)"),
            Style::default().fg(Color::White).bg(Color::Red),
        ),
        LayoutView::Loading => ("Loading reels...".to_string(), Style::default()),
        LayoutView::Ready => {
            let state = match (snap.replay, snap.phase) {
                (Some((id, phase)), _) => format!("Replaying spin {id} ({phase:?})"),
                (None, DisplayPhase::Idle) => "Ready".to_string(),
                (None, phase) => format!("{phase:?}"),
            };
            let spin = snap
                .binding
                .current_spin_id
                .map(|id| format!(" | spin {id}"))
                .unwrap_or_default();
            (
                format!("{} | {state}{spin}", snap.gateway),
                Style::default().fg(Color::Green),
            )
        }
    };
    let header = Paragraph::new(text)
        .style(style)
        .block(Block::default().borders(Borders::ALL).title("Reels"));
    f.render_widget(header, area);
}

fn draw_reels(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(banner_style(snap))
        .title(banner_title(snap));
    let inner = block.inner(area);
    f.render_widget(block, area);
    if snap.reels.is_empty() {
        f.render_widget(
            Paragraph::new("No reel layout").style(Style::default().fg(Color::DarkGray)),
            inner,
        );
        return;
    }
    let cols = snap.reels.len() as u16;
    let col_w = inner.width / cols.max(1);
    for (i, reel) in snap.reels.iter().enumerate() {
        let rect = Rect::new(inner.x + i as u16 * col_w, inner.y, col_w, inner.height);
        f.render_widget(reel_widget(reel), rect);
    }
}

fn reel_widget(reel: &ReelView) -> Paragraph<'static> {
    let trail = blur(reel.velocity);
    let lines = reel
        .symbols
        .iter()
        .map(|symbol| {
            let glyph = match symbol.0 {
                '_' => " ".to_string(),
                c => c.to_string(),
            };
            let style = symbol_style(symbol.0).add_modifier(if trail.is_empty() {
                Modifier::BOLD
            } else {
                Modifier::DIM
            });
            Line::from(vec![
                Span::raw(trail),
                Span::styled(format!(" {glyph} "), style),
                Span::raw(trail),
            ])
        })
        .collect_vec();
    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL))
}

fn symbol_style(code: char) -> Style {
    match code {
        'A' => Style::default().fg(Color::Magenta),
        'B' => Style::default().fg(Color::Yellow),
        'C' => Style::default().fg(Color::Cyan),
        'D' => Style::default().fg(Color::Green),
        _ => Style::default().fg(Color::DarkGray),
    }
}

fn banner_title(snap: &AppSnapshot) -> String {
    match &snap.banner {
        Some(banner) => {
            let replay = if banner.replay { "REPLAY " } else { "" };
            let tier = banner
                .tier
                .map(|tier| format!("{tier:?}").to_uppercase())
                .unwrap_or_default();
            format!("{replay}{tier} WIN {}", format_amount(banner.amount))
        }
        None => String::new(),
    }
}

fn banner_style(snap: &AppSnapshot) -> Style {
    match snap.banner.as_ref().and_then(|banner| banner.tier) {
        Some(WinTier::Jackpot) => Style::default()
            .fg(Color::Magenta)
            .add_modifier(Modifier::BOLD | Modifier::SLOW_BLINK),
        Some(WinTier::Large) => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        Some(_) => Style::default().fg(Color::Green),
        None => Style::default(),
    }
}

fn draw_bet(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let text = format!(
        "Per line: {} | Lines: {} | Total: {}",
        format_amount(snap.bet_per_line),
        snap.paylines,
        format_amount(snap.total_bet)
    );
    let bet = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Bet"));
    f.render_widget(bet, area);
}

fn draw_lower(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let lower = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let queue_lines = if snap.requests.is_empty() {
        vec![Line::styled("None", Style::default().fg(Color::DarkGray))]
    } else {
        snap.requests.iter().map(request_line).collect_vec()
    };
    let queue =
        Paragraph::new(queue_lines).block(Block::default().borders(Borders::ALL).title("Queue"));
    f.render_widget(queue, lower[0]);

    let history_lines = if snap.history.is_empty() {
        vec![Line::styled("None", Style::default().fg(Color::DarkGray))]
    } else {
        snap.history
            .iter()
            .enumerate()
            .map(|(i, request)| {
                let outcome = request.outcome.map(|o| o.to_string()).unwrap_or_default();
                let text = format!(
                    "{:<5} {} won {}",
                    request.id.to_string(),
                    pad(&outcome, 15),
                    format_amount(request.winnings.unwrap_or(0))
                );
                if i == snap.selected {
                    Line::styled(
                        format!("> {text}"),
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    )
                } else {
                    Line::from(format!("  {text}"))
                }
            })
            .collect_vec()
    };
    let history = Paragraph::new(history_lines)
        .block(Block::default().borders(Borders::ALL).title("History (r replay)"));
    f.render_widget(history, lower[1]);
}

fn request_line(request: &SpinRequest) -> Line<'static> {
    let color = match request.status {
        SpinStatus::Pending | SpinStatus::Submitting => Color::Gray,
        SpinStatus::Waiting | SpinStatus::Processing => Color::Cyan,
        SpinStatus::ReadyToClaim => Color::Yellow,
        SpinStatus::Completed => Color::Green,
        SpinStatus::Failed | SpinStatus::Expired => Color::Red,
    };
    let claimed = if request.claimed { " claimed" } else { "" };
    Line::from(vec![
        Span::raw(format!(
            "{:<5} {:>8} ",
            request.id.to_string(),
            format_amount(request.bet.total_bet)
        )),
        Span::styled(request.status.label(), Style::default().fg(color)),
        Span::raw(claimed),
    ])
}

fn pad(text: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(text);
    format!("{text}{}", " ".repeat(width.saturating_sub(used)))
}

fn draw_status(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines: Vec<Line> = Vec::new();
    if snap.status.is_empty() {
        lines.push(Line::from("Ready"));
    } else {
        for line in &snap.status {
            lines.push(Line::from(line.clone()));
        }
    }
    let status = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(Style::default().fg(Color::Green));
    f.render_widget(status, area);
}

fn draw_help(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let spin = if matches!(snap.layout, LayoutView::Ready) {
        "space spin"
    } else {
        "space spin (disabled)"
    };
    let help = Paragraph::new(format!(
        "{spin} | +/- bet | [/] lines | ↑/↓ select | r replay | x stop | l reload reels | q/Esc quit"
    ))
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}
