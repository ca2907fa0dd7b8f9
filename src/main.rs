use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use fleet_sync::config::SyncConfig;
use fleet_sync::fleet::command::ShipCommand;
use fleet_sync::fleet::ship::{Ownership, Ship, ShipId};
use fleet_sync::metrics::SyncMetrics;
use fleet_sync::net::channel::ChannelManager;
use fleet_sync::net::loopback::{link, LinkConditions};
use fleet_sync::server::authority::{spawn_client_reader, start_server_loop};
use fleet_sync::server::AuthorityServer;
use fleet_sync::sync::{spawn_channel_reader, start_client_loop, SyncManager};
use fleet_sync::util::clock::{Clock, SystemClock};
use fleet_sync::util::vec2::Vec2;

/// Simulated link between each client and the server
const LINK: LinkConditions = LinkConditions {
    latency_ms: 40,
    jitter_ms: 15,
    loss: 0.02,
};

const WORLD_SIZE: f64 = 200.0;
const COMMAND_INTERVAL: Duration = Duration::from_secs(3);
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

struct Client {
    name: &'static str,
    ship: ShipId,
    manager: Arc<Mutex<SyncManager>>,
}

/// Connect one client to the server over a pair of loopback links
fn connect_client(
    name: &'static str,
    server: &Arc<Mutex<AuthorityServer>>,
    config: &SyncConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<SyncMetrics>,
    own: Ship,
    others: &[Ship],
) -> anyhow::Result<Client> {
    let (up, up_rx) = link(LINK);
    let (down, down_rx) = link(LINK);
    let client_id = server.lock().add_client(Arc::new(down));

    let channel = Arc::new(ChannelManager::new());
    channel.connect(Arc::new(up));

    let mut manager = SyncManager::new(config.clone(), clock, channel.clone(), metrics)?;
    let ship = own.id;
    manager.register_ship(own, Ownership::Local)?;
    for other in others {
        manager.register_ship(other.clone(), Ownership::Remote)?;
    }
    let manager = Arc::new(Mutex::new(manager));

    spawn_client_reader(server.clone(), client_id, up_rx);
    spawn_channel_reader(channel, down_rx);
    start_client_loop(manager.clone());

    info!("{} connected as client {} driving ship {}", name, client_id, ship);
    Ok(Client {
        name,
        ship,
        manager,
    })
}

fn random_point(rng: &mut impl Rng) -> Vec2 {
    Vec2::new(
        rng.gen_range(-WORLD_SIZE..WORLD_SIZE),
        rng.gen_range(-WORLD_SIZE..WORLD_SIZE),
    )
}

fn report(server: &Arc<Mutex<AuthorityServer>>, clients: &[Client], metrics: &SyncMetrics) {
    for client in clients {
        let Some(authoritative) = server.lock().ship(client.ship).map(|s| s.position) else {
            continue;
        };
        for observer in clients {
            let guard = observer.manager.lock();
            if let Some(seen) = guard.render_position(client.ship) {
                info!(
                    "{} ship as seen by {}: ({:.1}, {:.1}), {:.2} from server",
                    client.name,
                    observer.name,
                    seen.x,
                    seen.y,
                    seen.distance_to(authoritative)
                );
            }
        }
    }

    let guard = clients[0].manager.lock();
    info!(
        "Latency {:.0}ms | delay {:.0}ms | pending inputs {} | corrections {}",
        guard.latency_ms(),
        guard.interpolation_delay_ms(),
        guard.pending_inputs(),
        metrics
            .reconciliations
            .load(std::sync::atomic::Ordering::Relaxed)
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Fleet Sync demo v{}", env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: tick_rate={}, input_rate_limit={}, full_sync_interval={}ms",
        config.tick_rate, config.input_rate_limit, config.full_sync_interval_ms
    );

    let metrics = Arc::new(SyncMetrics::new());

    #[cfg(feature = "metrics_server")]
    {
        let metrics_clone = metrics.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = fleet_sync::metrics::start_metrics_server(metrics_clone, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let server = Arc::new(Mutex::new(AuthorityServer::new(
        clock.clone(),
        config.tick_rate,
    )));
    start_server_loop(server.clone());

    let mut rng = rand::thread_rng();
    let alpha = Ship::new(Uuid::new_v4(), random_point(&mut rng));
    let bravo = Ship::new(Uuid::new_v4(), random_point(&mut rng));

    let clients = vec![
        connect_client(
            "alpha",
            &server,
            &config,
            clock.clone(),
            metrics.clone(),
            alpha.clone(),
            std::slice::from_ref(&bravo),
        )?,
        connect_client(
            "bravo",
            &server,
            &config,
            clock.clone(),
            Arc::new(SyncMetrics::new()),
            bravo,
            std::slice::from_ref(&alpha),
        )?,
    ];

    let mut commands = tokio::time::interval(COMMAND_INTERVAL);
    let mut reports = tokio::time::interval(REPORT_INTERVAL);
    // Skip the immediate first ticks; ships must be registered before any course
    commands.tick().await;
    reports.tick().await;

    loop {
        tokio::select! {
            _ = commands.tick() => {
                for client in &clients {
                    let destination = random_point(&mut rng);
                    let speed = rng.gen_range(2.0..8.0);
                    let command = ShipCommand::SetCourse { destination, speed };
                    if let Err(e) = client.manager.lock().submit(client.ship, command) {
                        warn!("{} input rejected: {}", client.name, e);
                    }
                }
            }
            _ = reports.tick() => report(&server, &clients, &metrics),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    for client in &clients {
        client.manager.lock().teardown();
    }
    info!("Demo stopped after {} server ticks", server.lock().tick_count());

    Ok(())
}
