//! Live dashboard for a BrainBit session.
//!
//! Usage:
//!   cargo run --bin tui -- --simulate                # built-in simulated headset
//!   cargo run --bin tui -- --address <ADDR> [--name <NAME>]
//!   cargo run --bin tui -- --simulate --config session.json
//!
//! Keys
//! ----
//!   c        restart calibration
//!   r        measure electrode resistance now
//!   +  / =   zoom out  (increase µV scale)
//!   -        zoom in   (decrease µV scale)
//!   a        auto-scale: fit Y axis to current peak amplitude
//!   x        clear waveform buffers
//!   q / Esc  quit

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, warn};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, Gauge, GraphType, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::sync::{mpsc, oneshot};

use brainbit_rs::config::SessionConfig;
use brainbit_rs::device::Backend;
use brainbit_rs::error::SessionError;
use brainbit_rs::protocol::{CHANNEL_NAMES, NUM_CHANNELS};
use brainbit_rs::resistance::{ResistanceQuality, ResistanceReport};
use brainbit_rs::session::{ConnectionContext, Session};
use brainbit_rs::sim::{SimBackend, SIM_ADDRESS};
use brainbit_rs::types::{AcquisitionMode, CalibrationState, SessionEvent, SmoothedMetrics};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Width of the scrolling waveform window in seconds.
const WINDOW_SECS: f64 = 8.0;

/// Channel readouts arrive once per signal batch, not once per sample.
const READOUT_HZ: f64 = 25.0;

const BUF_SIZE: usize = (WINDOW_SECS * READOUT_HZ) as usize;

/// Y-axis half ranges in µV.
const Y_SCALES: &[f64] = &[10.0, 25.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0];

/// ±50 µV fits both the simulator and a well-seated headset.
const DEFAULT_SCALE: usize = 2;

/// O1=Cyan, O2=Yellow, T3=Green, T4=Magenta.
const COLORS: [Color; NUM_CHANNELS] = [Color::Cyan, Color::Yellow, Color::Green, Color::Magenta];

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Lines kept in the message panel.
const MAX_MESSAGES: usize = 6;

/// Seconds between connect attempts after discovery fails.
const RETRY_SECS: u64 = 6;

/// Seconds before reconnecting after the link drops.  Reconnects reuse the
/// cached descriptor and skip the scan.
const RECONNECT_DELAY_SECS: u64 = 2;

// ── App state ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Link {
    Connecting(String),
    Connected(String),
    /// Last attempt failed; a retry is scheduled.
    Failed(String),
    Disconnected,
}

struct App {
    bufs: [VecDeque<f64>; NUM_CHANNELS],
    link: Link,
    status: String,
    mode: AcquisitionMode,
    calibration: CalibrationState,
    engagement: String,
    metrics: Option<SmoothedMetrics>,
    resistance: Option<ResistanceReport>,
    artifacts: bool,
    batches: u64,
    messages: VecDeque<(Color, String)>,
    scale_idx: usize,
}

impl App {
    fn new() -> Self {
        Self {
            bufs: std::array::from_fn(|_| VecDeque::with_capacity(BUF_SIZE + 8)),
            link: Link::Disconnected,
            status: String::new(),
            mode: AcquisitionMode::Idle,
            calibration: CalibrationState::NotStarted,
            engagement: String::new(),
            metrics: None,
            resistance: None,
            artifacts: false,
            batches: 0,
            messages: VecDeque::with_capacity(MAX_MESSAGES + 1),
            scale_idx: DEFAULT_SCALE,
        }
    }

    /// Fold one session event into the screen state.
    fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Status(s) => self.status = s,
            SessionEvent::Channels(c) => {
                self.batches = c.batches;
                for (buf, v) in self.bufs.iter_mut().zip(c.sample.channels()) {
                    buf.push_back(v * 1e6);
                    while buf.len() > BUF_SIZE {
                        buf.pop_front();
                    }
                }
            }
            SessionEvent::Resistance(r) => self.resistance = Some(r),
            SessionEvent::Artifacts(a) => self.artifacts = a,
            SessionEvent::Metrics(m) => self.metrics = Some(m),
            SessionEvent::Calibration(c) => self.calibration = c,
            SessionEvent::Engagement(text) => self.engagement = text,
            SessionEvent::Mode(m) => self.mode = m,
            SessionEvent::Warning(w) => self.message(Color::Yellow, w),
            SessionEvent::Error(e) => self.message(Color::Red, e),
            SessionEvent::Disconnected => self.link = Link::Disconnected,
        }
    }

    fn message(&mut self, color: Color, text: String) {
        self.messages.push_back((color, text));
        while self.messages.len() > MAX_MESSAGES {
            self.messages.pop_front();
        }
    }

    /// Reset everything that belongs to one session.
    fn clear_session(&mut self) {
        self.clear_waveforms();
        self.mode = AcquisitionMode::Idle;
        self.calibration = CalibrationState::NotStarted;
        self.engagement.clear();
        self.metrics = None;
        self.artifacts = false;
        self.batches = 0;
    }

    fn clear_waveforms(&mut self) {
        for b in &mut self.bufs {
            b.clear();
        }
    }

    fn y_range(&self) -> f64 {
        Y_SCALES[self.scale_idx]
    }

    fn scale_up(&mut self) {
        if self.scale_idx + 1 < Y_SCALES.len() {
            self.scale_idx += 1;
        }
    }

    fn scale_down(&mut self) {
        self.scale_idx = self.scale_idx.saturating_sub(1);
    }

    fn auto_scale(&mut self) {
        let peak = self
            .bufs
            .iter()
            .flat_map(|b| b.iter())
            .fold(0.0_f64, |acc, &v| acc.max(v.abs()));
        let needed = peak * 1.1;
        self.scale_idx = Y_SCALES
            .iter()
            .position(|&s| s >= needed)
            .unwrap_or(Y_SCALES.len() - 1);
    }
}

/// Lock shared UI state, recovering from a panicked holder.
fn lock(app: &Mutex<App>) -> MutexGuard<'_, App> {
    app.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Background tasks ──────────────────────────────────────────────────────────

type ConnectResult = (
    ConnectionContext,
    Result<(Session, mpsc::Receiver<SessionEvent>), SessionError>,
);

/// Run [`Session::connect`] off the UI loop.  The context travels with the
/// attempt and comes back with the result.
fn start_connect(
    backend: Arc<dyn Backend>,
    config: SessionConfig,
    mut ctx: ConnectionContext,
    address: Option<String>,
    name: Option<String>,
) -> oneshot::Receiver<ConnectResult> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = Session::connect(
            backend.as_ref(),
            &config,
            &mut ctx,
            address.as_deref(),
            name.as_deref(),
        )
        .await;
        let _ = tx.send((ctx, result));
    });
    rx
}

/// Drain session events into the shared app state until the session ends.
fn spawn_event_task(mut rx: mpsc::Receiver<SessionEvent>, app: Arc<Mutex<App>>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            lock(&app).apply(event);
        }
    });
}

// ── Rendering ─────────────────────────────────────────────────────────────────

fn draw(frame: &mut Frame, app: &App) {
    let root = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .split(frame.area());

    let body = Layout::horizontal([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(root[1]);

    draw_header(frame, root[0], app);
    draw_charts(frame, body[0], app);
    draw_side_panel(frame, body[1], app);
    draw_footer(frame, root[2], app);
}

fn spinner_str() -> &'static str {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    SPINNER[(ms / 100) as usize % SPINNER.len()]
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let (label, color) = match &app.link {
        Link::Connecting(target) => (
            format!("{} Connecting to {target}…", spinner_str()),
            Color::Yellow,
        ),
        Link::Connected(name) => (format!("● {name}"), Color::Green),
        Link::Failed(reason) => (
            format!("{} {reason}  retrying…", spinner_str()),
            Color::Red,
        ),
        Link::Disconnected => (format!("{} Disconnected", spinner_str()), Color::Red),
    };

    let mode_color = match app.mode {
        AcquisitionMode::Signal => Color::Green,
        AcquisitionMode::Resistance
        | AcquisitionMode::TransitioningToResistance
        | AcquisitionMode::TransitioningToSignal => Color::Yellow,
        AcquisitionMode::Idle | AcquisitionMode::Stopped => Color::DarkGray,
    };

    let line = Line::from(vec![
        Span::styled(
            " BrainBit Monitor ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(format!("mode: {}", app.mode), Style::default().fg(mode_color)),
        sep(),
        Span::styled(
            format!("±{:.0} µV", app.y_range()),
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(
            format!("{} batches", app.batches),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw(" "),
    ]);

    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

fn draw_charts(frame: &mut Frame, area: Rect, app: &App) {
    let rows = Layout::vertical([Constraint::Ratio(1, NUM_CHANNELS as u32); NUM_CHANNELS])
        .split(area);

    let y_range = app.y_range();
    for (ch, row) in rows.iter().enumerate() {
        // Out-of-range points are dropped by ratatui; clamp so the trace stays joined.
        let data: Vec<(f64, f64)> = app.bufs[ch]
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as f64 / READOUT_HZ, v.clamp(-y_range, y_range)))
            .collect();
        draw_channel(frame, *row, ch, &data, app);
    }
}

fn draw_channel(frame: &mut Frame, area: Rect, ch: usize, data: &[(f64, f64)], app: &App) {
    let color = COLORS[ch];
    let y_range = app.y_range();
    let buf = &app.bufs[ch];

    let (min_v, max_v) = buf
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let (min_v, max_v) = if buf.is_empty() { (0.0, 0.0) } else { (min_v, max_v) };
    let clipping = max_v > y_range || min_v < -y_range;
    let clip_tag = if clipping { " [CLIP]" } else { "" };

    let title = format!(
        " {}  min:{min_v:+7.1}  max:{max_v:+7.1} µV{clip_tag} ",
        CHANNEL_NAMES[ch]
    );

    let y_labels: Vec<String> = [-1.0, 0.0, 1.0]
        .iter()
        .map(|&f| format!("{:+.0}", f * y_range))
        .collect();
    let x_labels = vec!["0s".to_string(), format!("{WINDOW_SECS:.0}s")];

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data);

    let chart = Chart::new(vec![dataset])
        .block(
            Block::default()
                .title(Span::styled(
                    title,
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(if clipping { Color::Red } else { color })),
        )
        .x_axis(
            Axis::default()
                .bounds([0.0, WINDOW_SECS])
                .labels(x_labels)
                .style(Style::default().fg(Color::DarkGray)),
        )
        .y_axis(
            Axis::default()
                .bounds([-y_range, y_range])
                .labels(y_labels)
                .style(Style::default().fg(Color::DarkGray)),
        );

    frame.render_widget(chart, area);
}

/// Metrics gauges, contact quality and recent messages.
fn draw_side_panel(frame: &mut Frame, area: Rect, app: &App) {
    let [metrics_area, contact_area, messages_area] = Layout::vertical([
        Constraint::Length(13),
        Constraint::Length(7),
        Constraint::Min(0),
    ])
    .areas(area);

    draw_metrics(frame, metrics_area, app);
    draw_contact(frame, contact_area, app);
    draw_messages(frame, messages_area, app);
}

fn draw_metrics(frame: &mut Frame, area: Rect, app: &App) {
    let title = match app.calibration {
        CalibrationState::Complete => " Metrics ".to_owned(),
        CalibrationState::InProgress(p) => format!(" Metrics  calibrating {p}% "),
        CalibrationState::NotStarted => " Metrics  waiting for calibration ".to_owned(),
    };
    let block = Block::default().title(title).borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::vertical([Constraint::Length(2); 6]).split(inner);

    let m = app.metrics.unwrap_or_default();
    let gauges = [
        ("Attention", m.attention, Color::LightRed),
        ("Relaxation", m.relaxation, Color::LightGreen),
        ("Alpha", m.alpha, Color::Cyan),
        ("Beta", m.beta, Color::Yellow),
        ("Theta", m.theta, Color::Magenta),
    ];
    for (row, (label, value, color)) in rows.iter().zip(gauges) {
        let value = if app.metrics.is_some() { value.clamp(0.0, 1.0) } else { 0.0 };
        frame.render_widget(
            Gauge::default()
                .gauge_style(Style::default().fg(color))
                .label(format!("{label} {:.1}%", value * 100.0))
                .ratio(value),
            *row,
        );
    }

    let artifact = if app.artifacts {
        Span::styled("  ⚠ artifacts", Style::default().fg(Color::Red))
    } else {
        Span::raw("")
    };
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(app.engagement.clone(), Style::default().fg(Color::White)),
            artifact,
        ])),
        rows[5],
    );
}

fn quality_color(q: ResistanceQuality) -> Color {
    match q {
        ResistanceQuality::Excellent => Color::Green,
        ResistanceQuality::Good => Color::LightGreen,
        ResistanceQuality::Fair => Color::Yellow,
        ResistanceQuality::Poor => Color::LightRed,
        ResistanceQuality::NoContact => Color::Red,
    }
}

fn draw_contact(frame: &mut Frame, area: Rect, app: &App) {
    let lines: Vec<Line> = match &app.resistance {
        None => vec![Line::from(Span::styled(
            " No measurement yet",
            Style::default().fg(Color::DarkGray),
        ))],
        Some(report @ ResistanceReport::NoContact) => vec![Line::from(Span::styled(
            format!(" {report}"),
            Style::default().fg(Color::Red),
        ))],
        Some(ResistanceReport::Channels(channels)) => channels
            .iter()
            .map(|c| {
                Line::from(vec![
                    Span::styled(format!(" {:<3}", c.name), Style::default().fg(Color::White)),
                    Span::styled(
                        format!(
                            "{:>8} {} {}",
                            brainbit_rs::resistance::format_ohms(c.ohms),
                            c.quality.symbol(),
                            c.quality.label()
                        ),
                        Style::default().fg(quality_color(c.quality)),
                    ),
                ])
            })
            .collect(),
    };
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().title(" Contact ").borders(Borders::ALL)),
        area,
    );
}

fn draw_messages(frame: &mut Frame, area: Rect, app: &App) {
    let mut lines = vec![Line::from(Span::styled(
        format!(" {}", app.status),
        Style::default().fg(Color::Gray),
    ))];
    lines.extend(
        app.messages
            .iter()
            .map(|(color, text)| Line::from(Span::styled(format!(" {text}"), Style::default().fg(*color)))),
    );
    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(Block::default().title(" Messages ").borders(Borders::ALL)),
        area,
    );
}

fn draw_footer(frame: &mut Frame, area: Rect, _app: &App) {
    let keys = Line::from(vec![
        Span::raw(" "),
        key("[c]"),
        Span::raw("Calibrate  "),
        key("[r]"),
        Span::raw("Resistance  "),
        key("[+]"),
        Span::raw("Scale↑  "),
        key("[-]"),
        Span::raw("Scale↓  "),
        key("[a]"),
        Span::raw("Auto-scale  "),
        key("[x]"),
        Span::raw("Clear  "),
        key("[q]"),
        Span::raw("Quit"),
    ]);
    frame.render_widget(
        Paragraph::new(keys).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn key(s: &str) -> Span<'_> {
    Span::styled(
        s,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Live dashboard for a BrainBit headset.
#[derive(Parser, Debug)]
#[command(name = "tui", version)]
struct Cli {
    /// Headset address (MAC on Linux, UUID on macOS)
    #[arg(long)]
    address: Option<String>,

    /// Advertised name, shown in the header
    #[arg(long)]
    name: Option<String>,

    /// Run against the built-in simulated headset
    #[arg(long)]
    simulate: bool,

    /// JSON session configuration
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[cfg(feature = "ble")]
fn real_backend() -> Result<Arc<dyn Backend>> {
    Ok(Arc::new(brainbit_rs::ble::BleBackend))
}

#[cfg(not(feature = "ble"))]
fn real_backend() -> Result<Arc<dyn Backend>> {
    anyhow::bail!("built without Bluetooth support; use --simulate")
}

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::IsTerminal as _;

    let cli = Cli::parse();
    if !io::stdout().is_terminal() {
        eprintln!("Error: the BrainBit tui requires a real terminal (TTY).");
        std::process::exit(1);
    }

    // ── Logging ─────────────────────────────────────────────────────────────
    // Logs go to brainbit-tui.log so they never tear the display.
    if let Ok(file) = std::fs::File::create("brainbit-tui.log") {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    }

    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let simulate = cli.simulate;
    let name = cli.name;
    let address = if simulate {
        Some(cli.address.unwrap_or_else(|| SIM_ADDRESS.to_owned()))
    } else {
        cli.address
    };
    let backend: Arc<dyn Backend> = if simulate {
        Arc::new(SimBackend::new())
    } else {
        real_backend()?
    };

    let app = Arc::new(Mutex::new(App::new()));
    let target = address.clone().unwrap_or_default();

    // Owned by whichever of the main loop or a connect attempt holds it.
    let mut ctx = Some(ConnectionContext::new());
    let mut session: Option<Arc<Session>> = None;
    let mut pending_connect: Option<oneshot::Receiver<ConnectResult>> = None;
    let mut retry_at: Option<tokio::time::Instant> = Some(tokio::time::Instant::now());

    // ── Terminal setup ────────────────────────────────────────────────────────
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    let tick = Duration::from_millis(33);

    'main: loop {
        // ── 1. Collect a finished connection attempt ─────────────────────────
        if let Some(rx) = pending_connect.as_mut() {
            if let Ok((returned_ctx, result)) = rx.try_recv() {
                pending_connect = None;
                ctx = Some(returned_ctx);
                match result {
                    Ok((s, events)) => {
                        let label = s.descriptor().name.clone();
                        info!("Connected to {label}");
                        lock(&app).link = Link::Connected(label);
                        spawn_event_task(events, Arc::clone(&app));
                        session = Some(Arc::new(s));
                    }
                    Err(SessionError::MissingAddress) => {
                        lock(&app).link = Link::Failed("no address given (use --address)".into());
                    }
                    Err(e) => {
                        warn!("Connect failed: {e}");
                        lock(&app).link = Link::Failed(e.to_string());
                        retry_at = Some(
                            tokio::time::Instant::now() + Duration::from_secs(RETRY_SECS),
                        );
                    }
                }
            }
        }

        // ── 2. React to a dropped link ───────────────────────────────────────
        let dropped = matches!(lock(&app).link, Link::Disconnected) && session.is_some();
        if dropped {
            if let Some(s) = session.take() {
                tokio::spawn(async move { s.teardown().await });
            }
            lock(&app).clear_session();
            retry_at = Some(
                tokio::time::Instant::now() + Duration::from_secs(RECONNECT_DELAY_SECS),
            );
        }

        // ── 3. Fire a scheduled connect ──────────────────────────────────────
        if let Some(t) = retry_at {
            if tokio::time::Instant::now() >= t && pending_connect.is_none() {
                if let Some(c) = ctx.take() {
                    retry_at = None;
                    lock(&app).link = Link::Connecting(target.clone());
                    pending_connect = Some(start_connect(
                        Arc::clone(&backend),
                        config.clone(),
                        c,
                        address.clone(),
                        name.clone(),
                    ));
                }
            }
        }

        // ── 4. Render ────────────────────────────────────────────────────────
        {
            let s = lock(&app);
            terminal.draw(|f| draw(f, &s))?;
        }

        // ── 5. Keyboard ──────────────────────────────────────────────────────
        if !event::poll(tick)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };

        // Raw mode delivers Ctrl+C as a key event.
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        if ctrl_c {
            break 'main;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break 'main,
            KeyCode::Char('c') => {
                if let Some(s) = session.as_ref() {
                    if let Err(e) = s.start_calibration() {
                        lock(&app).message(Color::Red, format!("Calibration: {e}"));
                    }
                }
            }
            KeyCode::Char('r') => {
                if let Some(s) = session.clone() {
                    tokio::spawn(async move {
                        let outcome = s.measure_resistance_now().await;
                        info!("Manual resistance check: {outcome:?}");
                    });
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') => lock(&app).scale_up(),
            KeyCode::Char('-') => lock(&app).scale_down(),
            KeyCode::Char('a') => lock(&app).auto_scale(),
            KeyCode::Char('x') => lock(&app).clear_waveforms(),
            _ => {}
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    if let Some(s) = session {
        s.teardown().await;
    }
    if let Some(mut c) = ctx {
        c.clear();
    }
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
