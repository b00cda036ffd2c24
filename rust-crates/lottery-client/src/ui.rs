use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEventKind,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use ethers::types::U256;
use lottery_client::{
    ActivityLog,
    ClientState,
    Phase,
    codec::{
        format_percent,
        short_address,
        short_hash,
        to_decimal_string,
    },
};
use rand::Rng;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::{
    Stdout,
    stdout,
};
use tokio::sync::mpsc;

#[derive(PartialEq, Eq, Debug)]
pub enum UserEvent {
    Quit,
    Play { salt: U256 },
    Claim,
    Fund(String),
    SetParams {
        prize: String,
        entry_fee: String,
        win_chance_percent: String,
    },
    Withdraw(String),
    Refresh,
    ToggleConnection,
    Redraw,
}

pub struct View<'a> {
    pub state: &'a ClientState,
    pub activity: &'a ActivityLog,
    pub phase: Phase,
    pub status: &'a str,
    pub errors: &'a [String],
    pub network: &'a str,
}

pub struct UiState {
    mode: Mode,
    is_owner: bool,
    salt: String,
    terminal: Option<Terminal<CrosstermBackend<Stdout>>>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            mode: Mode::Normal,
            is_owner: false,
            salt: random_salt_text(),
            terminal: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    PlayModal(AmountInput),
    FundModal(AmountInput),
    WithdrawModal(AmountInput),
    ParamsModal(ParamsInput),
    QuitModal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct AmountInput {
    value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ParamsInput {
    fields: [String; 3],
    focus: usize,
}

const PARAM_LABELS: [&str; 3] = ["Prize (ETH)", "Entry fee (ETH)", "Win chance (%)"];
const MAX_SALT_DIGITS: usize = 30;

fn random_salt_text() -> String {
    rand::rng().random_range(0..1_000_000_000_000u64).to_string()
}

fn edit_digits(value: &mut String, code: KeyCode) -> bool {
    match code {
        KeyCode::Char(c) if c.is_ascii_digit() && value.len() < MAX_SALT_DIGITS => {
            value.push(c)
        }
        KeyCode::Backspace => {
            value.pop();
        }
        _ => return false,
    }
    true
}

// An empty salt plays as zero.
fn parse_salt(value: &str) -> U256 {
    if value.is_empty() {
        return U256::zero();
    }
    U256::from_dec_str(value).unwrap_or_default()
}

fn edit_decimal(value: &mut String, code: KeyCode) -> bool {
    match code {
        KeyCode::Char(c) if c.is_ascii_digit() => value.push(c),
        KeyCode::Char('.') if !value.contains('.') => value.push('.'),
        KeyCode::Backspace => {
            value.pop();
        }
        _ => return false,
    }
    true
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, view: &View<'_>) -> Result<()> {
    state.is_owner = view.state.is_owner();
    if !state.is_owner
        && matches!(state.mode, Mode::ParamsModal(_) | Mode::WithdrawModal(_))
    {
        state.mode = Mode::Normal;
    }
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, view))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

/// Reads terminal events on a dedicated thread so the async loop never
/// blocks on input.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let event = event::read();
            let failed = event.is_err();
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(input: &mut InputEventReceiver) -> Result<Event> {
    match input.recv().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input closed")),
    }
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let k = match event {
        Event::Key(k) => k,
        Event::Resize(..) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    if k.kind != KeyEventKind::Press {
        return None;
    }
    match &mut state.mode {
        Mode::PlayModal(input) => match k.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                let salt = parse_salt(&input.value);
                state.salt = std::mem::take(&mut input.value);
                state.mode = Mode::Normal;
                Some(UserEvent::Play { salt })
            }
            code => edit_digits(&mut input.value, code).then_some(UserEvent::Redraw),
        },
        Mode::FundModal(input) | Mode::WithdrawModal(input) => match k.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter if !input.value.is_empty() => {
                let value = std::mem::take(&mut input.value);
                let event = match state.mode {
                    Mode::FundModal(_) => UserEvent::Fund(value),
                    _ => UserEvent::Withdraw(value),
                };
                state.mode = Mode::Normal;
                Some(event)
            }
            code => edit_decimal(&mut input.value, code).then_some(UserEvent::Redraw),
        },
        Mode::ParamsModal(input) => match k.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Tab | KeyCode::Down => {
                input.focus = (input.focus + 1) % PARAM_LABELS.len();
                Some(UserEvent::Redraw)
            }
            KeyCode::BackTab | KeyCode::Up => {
                input.focus = (input.focus + PARAM_LABELS.len() - 1) % PARAM_LABELS.len();
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter if input.fields.iter().all(|f| !f.is_empty()) => {
                let [prize, entry_fee, win_chance_percent] = std::mem::take(&mut input.fields);
                state.mode = Mode::Normal;
                Some(UserEvent::SetParams {
                    prize,
                    entry_fee,
                    win_chance_percent,
                })
            }
            code => {
                let focused = &mut input.fields[input.focus];
                edit_decimal(focused, code).then_some(UserEvent::Redraw)
            }
        },
        Mode::QuitModal => match k.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Normal => match k.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                state.mode = Mode::QuitModal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Char('p') => {
                state.mode = Mode::PlayModal(AmountInput {
                    value: state.salt.clone(),
                });
                Some(UserEvent::Redraw)
            }
            KeyCode::Char('c') => Some(UserEvent::Claim),
            KeyCode::Char('f') => {
                state.mode = Mode::FundModal(AmountInput::default());
                Some(UserEvent::Redraw)
            }
            KeyCode::Char('s') if state.is_owner => {
                state.mode = Mode::ParamsModal(ParamsInput::default());
                Some(UserEvent::Redraw)
            }
            KeyCode::Char('w') if state.is_owner => {
                state.mode = Mode::WithdrawModal(AmountInput::default());
                Some(UserEvent::Redraw)
            }
            KeyCode::Char('r') => Some(UserEvent::Refresh),
            KeyCode::Char('d') => Some(UserEvent::ToggleConnection),
            _ => None,
        },
    }
}

fn ui(f: &mut Frame, state: &UiState, view: &View<'_>) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // wallet + lottery
            Constraint::Length(7), // player + recent results
            Constraint::Min(6),    // activity
            Constraint::Length(4), // status/errors
            Constraint::Length(3), // help
        ])
        .split(f.area());

    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[0]);
    draw_wallet_panel(f, top[0], view);
    draw_lottery_panel(f, top[1], view);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[1]);
    draw_player_panel(f, middle[0], view);
    draw_recent_results(f, middle[1], view);

    draw_activity(f, chunks[2], view);
    draw_status(f, chunks[3], view);
    draw_help(f, chunks[4], state);
    draw_modals(f, state);
}

fn or_dash<T>(value: Option<T>, render: impl FnOnce(T) -> String) -> String {
    value.map_or_else(|| "-".to_owned(), render)
}

fn draw_wallet_panel(f: &mut Frame, area: Rect, view: &View<'_>) {
    let account = or_dash(view.state.connected_address(), short_address);
    let network = match view.state.network_ok {
        Some(true) => Span::styled(view.network, Style::default().fg(Color::Green)),
        Some(false) => Span::styled(
            format!("{} (wrong network)", view.network),
            Style::default().fg(Color::Red),
        ),
        None => Span::raw(view.network),
    };
    let role = if view.state.is_owner() { "owner" } else { "player" };
    let lines = vec![
        Line::from(format!("Account: {account}")),
        Line::from(vec![Span::raw("Network: "), network]),
        Line::from(format!("Role: {role}")),
        Line::from(format!("Tx: {:?}", view.phase)),
    ];
    let widget =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Wallet"));
    f.render_widget(widget, area);
}

fn draw_lottery_panel(f: &mut Frame, area: Rect, view: &View<'_>) {
    let global = &view.state.global;
    let eth = |v| format!("{} ETH", to_decimal_string(v));
    let lines = vec![
        Line::from(format!(
            "Prize: {} | Entry fee: {}",
            or_dash(global.prize_amount, eth),
            or_dash(global.entry_fee, eth)
        )),
        Line::from(format!(
            "Win chance: {} | Pot: {}",
            or_dash(global.win_chance_ppm, |ppm| format!("{}%", format_percent(ppm))),
            or_dash(global.contract_balance, eth)
        )),
        Line::from(format!(
            "Block: {} | Owner: {}",
            or_dash(global.current_block, |b| b.to_string()),
            or_dash(global.owner, short_address)
        )),
        Line::from(format!(
            "Updated: {}",
            or_dash(global.refreshed_at, |t| t.format("%H:%M:%S").to_string())
        )),
    ];
    let widget =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Lottery"));
    f.render_widget(widget, area);
}

fn draw_player_panel(f: &mut Frame, area: Rect, view: &View<'_>) {
    let lines = match &view.state.user {
        None if view.state.session.is_none() => vec![Line::from("Not connected (d to connect)")],
        None => vec![Line::from("Loading…")],
        Some(user) => {
            let play = if user.can_play_now {
                Span::styled("You can play now", Style::default().fg(Color::Green))
            } else {
                Span::styled(
                    format!("Wait for block {}", user.next_allowed_block),
                    Style::default().fg(Color::Yellow),
                )
            };
            vec![
                Line::from(format!(
                    "Pending prize: {} ETH",
                    to_decimal_string(user.pending_prize)
                )),
                Line::from(format!("Last played block: {}", user.last_played_block)),
                Line::from(format!("Next allowed block: {}", user.next_allowed_block)),
                Line::from(play),
            ]
        }
    };
    let widget =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Player"));
    f.render_widget(widget, area);
}

fn draw_recent_results(f: &mut Frame, area: Rect, view: &View<'_>) {
    let mut lines: Vec<Line> = view
        .state
        .recent_results
        .iter()
        .map(|r| {
            let (text, color) = if r.won {
                (
                    format!("WIN {} ETH", to_decimal_string(r.prize_amount)),
                    Color::Green,
                )
            } else {
                ("Loss".to_owned(), Color::Gray)
            };
            Line::from(vec![
                Span::raw(format!("#{} {} ", r.block_number, short_address(r.player))),
                Span::styled(text, Style::default().fg(color)),
            ])
        })
        .collect();
    if lines.is_empty() {
        lines.push(Line::from("No recent results"));
    }
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Recent results"));
    f.render_widget(widget, area);
}

fn draw_activity(f: &mut Frame, area: Rect, view: &View<'_>) {
    let items: Vec<ListItem> = view
        .activity
        .iter()
        .map(|entry| {
            let time = entry.recorded_at.format("%H:%M:%S");
            let style = if entry.text.starts_with("Error") {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            ListItem::new(Line::styled(format!("{time} {}", entry.text), style))
        })
        .collect();
    let title = match view.activity.iter().next().and_then(|e| e.tx_hash) {
        Some(hash) => format!("Activity (latest tx {})", short_hash(hash)),
        None => "Activity".to_owned(),
    };
    let widget = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn draw_status(f: &mut Frame, area: Rect, view: &View<'_>) {
    let widget = if view.errors.is_empty() {
        let text = if view.status.trim().is_empty() {
            "Ready"
        } else {
            view.status
        };
        Paragraph::new(text)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .style(Style::default().fg(Color::Green))
    } else {
        let lines: Vec<Line> = view
            .errors
            .iter()
            .rev()
            .map(|e| Line::from(e.clone()))
            .collect();
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Errors"))
            .style(Style::default().fg(Color::Red))
    };
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect, state: &UiState) {
    let text = if state.is_owner {
        "p play | c claim | f fund | s set params | w withdraw | r refresh | d connect/disconnect | q quit"
    } else {
        "p play | c claim | f fund | r refresh | d connect/disconnect | q quit"
    };
    let help = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    match &state.mode {
        Mode::PlayModal(input) => {
            let area = centered_rect(40, 25, f.area());
            let block = Block::default().borders(Borders::ALL).title("Play");
            let p = Paragraph::new(format!(
                "User salt: {}\nEnter=play Esc=cancel",
                input.value
            ));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::FundModal(input) | Mode::WithdrawModal(input) => {
            let title = match state.mode {
                Mode::FundModal(_) => "Fund the pot",
                _ => "Withdraw from the pot",
            };
            let area = centered_rect(40, 25, f.area());
            let block = Block::default().borders(Borders::ALL).title(title);
            let p = Paragraph::new(format!(
                "Amount (ETH): {}\nEnter=confirm Esc=cancel",
                input.value
            ));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::ParamsModal(input) => {
            let area = centered_rect(50, 35, f.area());
            let block = Block::default()
                .borders(Borders::ALL)
                .title("Set parameters");
            let mut lines: Vec<Line> = PARAM_LABELS
                .iter()
                .zip(&input.fields)
                .enumerate()
                .map(|(i, (label, value))| {
                    let cur = if i == input.focus { ">" } else { " " };
                    Line::from(format!("{cur} {label}: {value}"))
                })
                .collect();
            lines.push(Line::from(""));
            lines.push(Line::from("Enter=confirm Esc=cancel Tab/↑/↓ move"));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(Paragraph::new(lines), block.inner(area));
        }
        Mode::QuitModal => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Confirm Quit");
            let p = Paragraph::new("Quit the lottery client? (Y/N)");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}
