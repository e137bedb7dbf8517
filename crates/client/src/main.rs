mod script;
mod stats;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use script::{Pattern, Script};
use stats::BotStats;
use tether::player::{PlayerBehaviour, register_methods, register_prefabs};
use tether::{
    DEFAULT_PORT, DeliveryMode, MethodTable, NetContext, NetEvent, NetSettings, PrefabRegistry, RpcValue,
    UdpClientTransport,
};

const REPORT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "tether-client")]
#[command(about = "Headless tether client driven by a movement script")]
struct Args {
    #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    server: SocketAddr,

    /// RON settings file; must match the server's tick rate.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "bot")]
    name: String,

    #[arg(long, value_enum, default_value_t = Pattern::Circle)]
    pattern: Pattern,

    #[arg(long, help = "Seconds between jumps")]
    jump_every: Option<f32>,

    #[arg(long, help = "Seconds to stay connected; runs forever if omitted")]
    duration: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => NetSettings::load(path)?,
        None => NetSettings::default(),
    };
    let transport = UdpClientTransport::connect(args.server, &settings)
        .with_context(|| format!("failed to open a socket towards {}", args.server))?;

    let mut prefabs = PrefabRegistry::new();
    register_prefabs(&mut prefabs);
    let mut methods = MethodTable::new();
    register_methods(&mut methods)?;

    let mut context = NetContext::client(Box::new(transport), settings, prefabs, methods);
    context.set_scene_ready(true);

    run(&mut context, &args)
}

fn run(context: &mut NetContext, args: &Args) -> Result<()> {
    let mut script = Script::new(args.pattern, args.jump_every);
    let mut stats = BotStats::new();
    let mut named = false;

    let start = Instant::now();
    let mut last_update = start;
    let mut last_report = start;

    loop {
        let now = Instant::now();
        let elapsed = now - start;
        if args.duration.is_some_and(|limit| elapsed.as_secs_f32() >= limit) {
            log::info!("Time is up");
            break;
        }

        if let Some(player) = context.local_player() {
            if !named {
                // Buffered so clients joining later learn the name too.
                let name = vec![RpcValue::from(args.name.as_str())];
                context.call(player, DeliveryMode::AllBuffered, "SetName", name)?;
                named = true;
            }
            if let Some(behaviour) = context
                .directory_mut()
                .get_mut(player)
                .and_then(|record| record.behaviour_mut::<PlayerBehaviour>())
            {
                script.apply(elapsed.as_secs_f32(), &mut behaviour.controls);
            }
        }

        let ticks = context.update((now - last_update).as_secs_f32());
        last_update = now;
        for _ in 0..ticks {
            stats.record_tick();
        }

        for event in context.drain_events() {
            stats.record_event(&event);
            match &event {
                NetEvent::Connected { local } => log::info!("Joined as {}", local),
                NetEvent::RemoteConnected(other) => log::info!("{} joined", other),
                NetEvent::RemoteDisconnected(other) => log::info!("{} left", other),
                NetEvent::Disconnected { reason } => {
                    log::warn!("Disconnected: {}", reason.as_str());
                    return Ok(());
                }
                NetEvent::Corrected { .. } | NetEvent::HardCorrection { .. } => log::debug!("{:?}", event),
                _ => {}
            }
        }

        if now - last_report >= REPORT_INTERVAL {
            last_report = now;
            report(context, &stats);
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    report(context, &stats);
    context.disconnect();
    Ok(())
}

fn report(context: &NetContext, stats: &BotStats) {
    let net = context.stats();
    let position = context
        .local_player()
        .and_then(|player| context.directory().get(player))
        .map(|record| record.transform.position);
    log::info!(
        "tick {} ({:.0}/s) | rtt {:.1}ms loss {:.1}% | entities {} | corrections {} ({} replayed, {} hard) | rejected {} | pos {:?}",
        context.current_tick(),
        stats.tick_rate(),
        net.rtt_ms,
        net.packet_loss_percent,
        context.directory().len(),
        stats.corrections,
        stats.replayed,
        stats.hard_corrections,
        stats.rejected_calls,
        position,
    );
}
