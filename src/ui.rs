use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Tabs},
    Frame, Terminal,
};
use std::{io, time::Duration};
use taskers_live::{FilterSelector, LiveTaskList, Phase, RemoteStore, TaskId, TaskRecord};

const TICK: Duration = Duration::from_millis(50);
const HELP: &str =
    "←/→ filter  ↑/↓ select  space toggle  a add  d delete  v viewer  r refresh  q quit";

/// Runs the UI until `q`. Command failures land in `session.error()` and are
/// shown in the status line, so their results are not inspected here.
pub async fn run_app<B: Backend, S: RemoteStore + ?Sized + 'static>(
    terminal: &mut Terminal<B>,
    session: &mut LiveTaskList<S>,
) -> io::Result<()> {
    let mut selected = 0usize;
    let mut status = String::new();
    loop {
        if let Some(notice) = session.take_notices().pop() {
            status = notice;
        }
        selected = selected.min(session.tasks().len().saturating_sub(1));
        terminal.draw(|f| draw(f, session, selected, &status))?;

        if event::poll(TICK)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') => return Ok(()), // Quit
                    KeyCode::Char('a') => add_task(session).await,
                    KeyCode::Char('d') => {
                        if let Some(id) = selected_id(session, selected) {
                            let _ = session.delete_task(id).await;
                        }
                    }
                    KeyCode::Char(' ') => {
                        if let Some(id) = selected_id(session, selected) {
                            let _ = session.toggle_completion(id).await;
                        }
                    }
                    KeyCode::Char('v') => cycle_viewer(session).await,
                    KeyCode::Char('r') => session.refresh().await,
                    KeyCode::Right | KeyCode::Tab => shift_filter(session, 1).await,
                    KeyCode::Left => shift_filter(session, -1).await,
                    KeyCode::Up => selected = selected.saturating_sub(1),
                    KeyCode::Down => {
                        if selected + 1 < session.tasks().len() {
                            selected += 1;
                        }
                    }
                    _ => {}
                }
            }
        }

        // Fold whatever the store delivered meanwhile, without blocking.
        while let Ok(input) = tokio::time::timeout(Duration::ZERO, session.next_input()).await {
            session.apply_input(input).await;
        }
    }
}

fn draw<S: RemoteStore + ?Sized + 'static>(
    f: &mut Frame,
    session: &LiveTaskList<S>,
    selected: usize,
    status: &str,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(f.area());

    let viewer = session
        .viewer()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "nobody".to_string());
    let active = FilterSelector::ALL
        .iter()
        .position(|s| *s == session.filter())
        .unwrap_or(0);
    let tabs = Tabs::new(FilterSelector::ALL.iter().map(|s| s.label()))
        .block(
            Block::default()
                .title(format!("Tasks for {viewer}"))
                .borders(Borders::ALL),
        )
        .select(active)
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    f.render_widget(tabs, chunks[0]);

    let phase = match session.phase() {
        Phase::Idle => "offline",
        Phase::Loading => "loading",
        Phase::Live => "live",
    };
    let items: Vec<ListItem> = session.tasks().map(task_item).collect();
    let has_items = !items.is_empty();
    let list = List::new(items)
        .block(Block::default().title(phase).borders(Borders::ALL))
        .highlight_style(Style::default().add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    let mut state = ListState::default();
    state.select(has_items.then_some(selected));
    f.render_stateful_widget(list, chunks[1], &mut state);

    let status_line = match session.error() {
        Some(err) => Line::from(Span::styled(err.to_string(), Style::default().fg(Color::Red))),
        None => Line::from(status.to_string()),
    };
    f.render_widget(Paragraph::new(status_line), chunks[2]);
    f.render_widget(Paragraph::new(HELP), chunks[3]);
}

fn task_item(task: &TaskRecord) -> ListItem<'_> {
    let mark = if task.is_complete { "[x] " } else { "[ ] " };
    let due = task
        .due_at
        .map(|d| d.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let assignee = task
        .assignee_id
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "No one".to_string());
    ListItem::new(Line::from(vec![
        Span::raw(mark),
        Span::raw(format!("[#{}] ", task.id)),
        Span::styled(task.description(), Style::default().fg(Color::White)),
        Span::raw(format!(" (Due: {due}) -> {assignee}")),
    ]))
}

fn selected_id<S: RemoteStore + ?Sized + 'static>(
    session: &LiveTaskList<S>,
    selected: usize,
) -> Option<TaskId> {
    session.tasks().nth(selected).map(|t| t.id)
}

async fn shift_filter<S: RemoteStore + ?Sized + 'static>(session: &mut LiveTaskList<S>, step: isize) {
    let count = FilterSelector::ALL.len() as isize;
    let current = FilterSelector::ALL
        .iter()
        .position(|s| *s == session.filter())
        .unwrap_or(0) as isize;
    let next = (current + step).rem_euclid(count) as usize;
    session.set_filter(FilterSelector::ALL[next]).await;
}

async fn cycle_viewer<S: RemoteStore + ?Sized + 'static>(session: &mut LiveTaskList<S>) {
    if session.refresh_users().await.is_err() || session.users().is_empty() {
        return;
    }
    let users = session.users();
    let current = session
        .viewer()
        .and_then(|viewer| users.iter().position(|u| &u.id == viewer));
    let next = current.map_or(0, |i| (i + 1) % users.len());
    let viewer = users[next].id.clone();
    session.set_viewer(viewer).await;
}

async fn add_task<S: RemoteStore + ?Sized + 'static>(session: &mut LiveTaskList<S>) {
    let _ = session.refresh_users().await;
    let Some(description) = prompt("Enter task description") else {
        return;
    };
    let Some(assignee) = prompt("Assign to (email or user id)") else {
        return;
    };
    let Some(due) = prompt("Due date (YYYY-MM-DDTHH:MM, blank for none)") else {
        return;
    };
    let assignee = session
        .users()
        .iter()
        .find(|u| u.email.eq_ignore_ascii_case(assignee.trim()))
        .map(|u| u.id.to_string())
        .unwrap_or(assignee);
    let _ = session.create_task(&description, &assignee, &due).await;
}

fn prompt(message: &str) -> Option<String> {
    disable_raw_mode().ok();
    println!("{}", message);
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_ok() {
        enable_raw_mode().ok();
        Some(input.trim().to_string())
    } else {
        enable_raw_mode().ok();
        None
    }
}
