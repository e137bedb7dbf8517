mod events;
mod server;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use server::TetherServer;
use tether::{NetSettings, PacketLossSimulation};
use tui::TuiState;

#[derive(Parser)]
#[command(name = "tether-server")]
#[command(about = "Authoritative tether server")]
struct Args {
    /// RON settings file; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(short, long)]
    max_clients: Option<usize>,

    #[arg(long)]
    headless: bool,

    #[arg(long, default_value_t = 4, help = "Crates spawned at startup")]
    crates: usize,

    #[arg(long, default_value_t = 1, help = "Drones spawned at startup")]
    drones: usize,

    #[arg(long, help = "Enable packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

impl Args {
    fn settings(&self) -> Result<NetSettings> {
        let mut settings = match &self.config {
            Some(path) => NetSettings::load(path)?,
            None => NetSettings {
                player_prefab: Some(tether::player::PLAYER_PREFAB.to_string()),
                ..NetSettings::default()
            },
        };
        if let Some(bind) = &self.bind {
            settings.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            settings.tick_rate = tick_rate;
        }
        if let Some(max_clients) = self.max_clients {
            settings.max_connections = max_clients;
        }
        if self.simulate_packet_loss {
            settings.simulation = Some(PacketLossSimulation {
                enabled: true,
                loss_percent: self.loss_percent,
                min_latency_ms: self.min_latency,
                max_latency_ms: self.max_latency,
                jitter_ms: self.jitter,
            });
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = args.settings()?;

    let mut server = TetherServer::new(settings)?;
    server.populate(args.crates, args.drones)?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        log::info!("Server started on {}", server.local_addr());
        server.run();
        log::info!("Server shutting down");
    } else {
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn run_with_tui(server: &mut TetherServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();
    tui_state.push_log(log::Level::Info, format!("Server started on {}", server.local_addr()));

    while running.load(Ordering::SeqCst) {
        server.tick_once();

        for event in server.drain_events() {
            let (level, message) = events::describe(&event);
            tui_state.push_log(level, message);
        }

        if let Some(connection) = tui_state.take_pending_kick() {
            server.kick_client(connection);
        }

        if event::poll(Duration::from_millis(1))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            let clients = server.client_infos();
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => running.store(false, Ordering::SeqCst),
                KeyCode::Up => tui_state.select_prev(),
                KeyCode::Down => tui_state.select_next(clients.len()),
                KeyCode::Char('k') | KeyCode::Char('K') => tui_state.request_kick(&clients),
                _ => {}
            }
        }

        let stats = server.stats();
        let clients = server.client_infos();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &clients);
        })?;
    }

    server.shutdown_connections();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
