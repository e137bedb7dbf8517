use std::collections::VecDeque;

use log::Level;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, Paragraph};

use crate::server::{ClientInfo, ServerStats};

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Default)]
pub struct TuiState {
    log: VecDeque<(Level, String)>,
    selected: usize,
    pending_kick: Option<tether::ConnectionId>,
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_log(&mut self, level: Level, message: impl Into<String>) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message.into()));
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1).min(count - 1);
        }
    }

    pub fn request_kick(&mut self, clients: &[ClientInfo]) {
        self.pending_kick = clients.get(self.selected).map(|client| client.id);
    }

    pub fn take_pending_kick(&mut self) -> Option<tether::ConnectionId> {
        self.pending_kick.take()
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &ServerStats, clients: &[ClientInfo]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Length(8),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_capacity(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats);
    render_clients(frame, chunks[3], state, clients);
    render_log(frame, chunks[4], state);
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let title = format!(" Tether Server - Uptime: {} ", format_duration(stats.uptime_secs));
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Tick: {}  |  Clients: {}  |  Entities: {}  |  Buffered RPCs: {}",
        stats.tick, stats.client_count, stats.entity_count, stats.buffered_calls
    );
    frame.render_widget(
        Paragraph::new(text)
            .block(block)
            .style(Style::default().fg(Color::White)),
        area,
    );
}

fn render_capacity(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Capacity ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let ratio = stats.client_count as f64 / stats.max_clients.max(1) as f64;
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!("{}/{} clients", stats.client_count, stats.max_clients));
    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network_stats;
    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Gray));
    let value = |text: String| Span::styled(text, Style::default().fg(Color::White));
    let lines = vec![
        Line::from(vec![
            label("Packets: "),
            value(format!("{} sent / {} recv", net.packets_sent, net.packets_received)),
        ]),
        Line::from(vec![
            label("Bytes: "),
            value(format!(
                "{} sent / {} recv",
                format_bytes(net.bytes_sent),
                format_bytes(net.bytes_received)
            )),
        ]),
        Line::from(vec![
            label("RTT: "),
            value(format!("{:.1}ms (+/- {:.1}ms)", net.rtt_ms, net.rtt_variance)),
        ]),
        Line::from(vec![
            label("Packet Loss: "),
            Span::styled(
                format!("{:.1}%  ({} resent)", net.packet_loss_percent, net.messages_resent),
                Style::default().fg(if net.packet_loss_percent > 5.0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_clients(frame: &mut Frame, area: Rect, state: &TuiState, clients: &[ClientInfo]) {
    let block = Block::default()
        .title(" Connections ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let items: Vec<ListItem> = clients
        .iter()
        .enumerate()
        .map(|(i, client)| {
            let address = client
                .address
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "-".to_string());
            let player = client
                .player
                .map(|player| player.to_string())
                .unwrap_or_else(|| "-".to_string());
            let text = format!(
                "{:<10} {:<22} {:<8} player {}",
                client.id.to_string(),
                address,
                if client.ready { "ready" } else { "joining" },
                player
            );
            let style = if i == state.selected {
                Style::default().fg(Color::Black).bg(Color::Magenta)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(text).style(style)
        })
        .collect();
    frame.render_widget(List::new(items).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let items: Vec<ListItem> = state
        .log
        .iter()
        .skip(state.log.len().saturating_sub(visible))
        .map(|(level, message)| {
            let color = match level {
                Level::Error => Color::Red,
                Level::Warn => Color::Yellow,
                Level::Info => Color::White,
                Level::Debug | Level::Trace => Color::DarkGray,
            };
            ListItem::new(message.as_str()).style(Style::default().fg(color))
        })
        .collect();
    frame.render_widget(List::new(items).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("Up/Down select  |  k kick  |  q or ESC quit")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );
    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
