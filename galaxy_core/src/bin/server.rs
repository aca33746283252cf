use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Sender};
use serde::Serialize;
use tracing::{error, info, warn};

use galaxy_core::demo::homeworld;
use galaxy_core::{
    build_demo_scheduler, load_runtime_config_from_env, EmpireId, EmpireRegistry, EntityId,
    EntitySpec, PlanetId, SimCommand, TickError, TickHost, TickReport, World,
};

const DEFAULT_COMMAND_BIND: &str = "127.0.0.1:41010";
const COMMAND_BIND_ENV: &str = "GALAXY_COMMAND_BIND";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, config_path) = load_runtime_config_from_env();
    let bind_addr: SocketAddr = match std::env::var(COMMAND_BIND_ENV)
        .unwrap_or_else(|_| DEFAULT_COMMAND_BIND.to_string())
        .parse()
    {
        Ok(addr) => addr,
        Err(err) => {
            error!(target: "galaxy::server", error = %err, "command_bind.invalid");
            return ExitCode::FAILURE;
        }
    };

    let (command_tx, command_rx) = unbounded::<SimCommand>();
    if let Err(err) = spawn_command_listener(bind_addr, command_tx.clone()) {
        error!(
            target: "galaxy::server",
            %bind_addr,
            error = %err,
            "command_listener.bind_failed"
        );
        return ExitCode::FAILURE;
    }

    let mut scheduler = build_demo_scheduler(config, LoggingHost);
    seed_garrisons(&command_tx, scheduler.simulation().world());

    info!(
        target: "galaxy::server",
        command_bind = %bind_addr,
        config = ?config_path,
        "Galaxy tick server ready"
    );

    let sim_thread = thread::Builder::new()
        .name("galaxy-sim".to_string())
        .spawn(move || scheduler.run(&command_rx));
    match sim_thread.map(|handle| handle.join()) {
        Ok(Ok(metrics)) => {
            info!(
                target: "galaxy::server",
                ticks = metrics.total_ticks,
                failed = metrics.failed_ticks,
                slow = metrics.slow_ticks,
                max_ms = metrics.max_duration.as_secs_f64() * 1000.0,
                "server.stopped"
            );
            ExitCode::SUCCESS
        }
        Ok(Err(_)) => {
            error!(target: "galaxy::server", "sim_thread.panicked");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(target: "galaxy::server", error = %err, "sim_thread.spawn_failed");
            ExitCode::FAILURE
        }
    }
}

/// Logs broadcasts in place of a network fan-out.
struct LoggingHost;

impl TickHost for LoggingHost {
    fn check_victory(&mut self, world: &World, tick: u64) -> Result<(), TickError> {
        let active: Vec<EmpireId> = world
            .empires
            .empires()
            .filter(|empire| !empire.defeated)
            .map(|empire| empire.id)
            .collect();
        if active.len() == 1 {
            info!(target: "galaxy::server", tick, winner = %active[0], "victory.declared");
        }
        Ok(())
    }

    fn broadcast(&mut self, _world: &World, report: &TickReport) -> Result<(), TickError> {
        info!(
            target: "galaxy::server",
            tick = report.tick,
            battles = report.combat.events.len(),
            destroyed = report.combat.destroyed_count(),
            population = report.population.total,
            health = report.population.health.as_str(),
            avg_ms = report.perf.avg_duration_ms,
            panic = report.perf.panic_mode,
            "tick.broadcast"
        );
        Ok(())
    }
}

fn seed_garrisons(sender: &Sender<SimCommand>, world: &World) {
    for empire in world.empires.empires() {
        let home = homeworld(empire.id);
        let garrison = [
            EntitySpec::structure("planetary_shield", empire.id, home),
            EntitySpec::structure("defense_platform", empire.id, home).with_stats(600.0, 25.0),
            EntitySpec::unit("carrier", empire.id, home).with_stats(300.0, 20.0),
            EntitySpec::unit("frigate", empire.id, home),
            EntitySpec::unit("fighter", empire.id, home).with_stats(60.0, 12.0),
        ];
        for spec in garrison {
            let _ = sender.send(SimCommand::Spawn(spec));
        }
    }
}

#[derive(Debug, PartialEq)]
enum Request {
    Spawn(EntitySpec),
    Target {
        attacker: EntityId,
        target: Option<EntityId>,
    },
    Invade {
        planet: PlanetId,
        attackers: Vec<EntityId>,
    },
    Stats,
    Shutdown,
}

fn spawn_command_listener(
    bind_addr: SocketAddr,
    sender: Sender<SimCommand>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;

    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!(target: "galaxy::server", %addr, "command_client.connected");
                let sender = sender.clone();
                thread::spawn(move || handle_client(stream, sender));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                warn!(target: "galaxy::server", error = %err, "command_client.accept_failed");
                thread::sleep(Duration::from_millis(200));
            }
        }
    });

    Ok(())
}

fn handle_client(stream: TcpStream, sender: Sender<SimCommand>) {
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(target: "galaxy::server", error = %err, "command_client.blocking_failed");
    }
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(target: "galaxy::server", error = %err, "command_client.clone_failed");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let Some(request) = parse_command(trimmed) else {
                    warn!(target: "galaxy::server", input = trimmed, "command.invalid");
                    continue;
                };
                match dispatch(request, &sender) {
                    Ok(Some(response)) => {
                        if writeln!(writer, "{response}").is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(()) => break,
                }
            }
            Err(err) => {
                warn!(target: "galaxy::server", error = %err, "command.read_failed");
                break;
            }
        }
    }
}

/// Forwards one request to the simulation thread. Requests with a reply wait
/// for it and render it as a JSON line. `Err` ends the client session.
fn dispatch(request: Request, sender: &Sender<SimCommand>) -> Result<Option<String>, ()> {
    match request {
        Request::Spawn(spec) => sender
            .send(SimCommand::Spawn(spec))
            .map(|_| None)
            .map_err(|_| ()),
        Request::Target { attacker, target } => sender
            .send(SimCommand::SetTarget { attacker, target })
            .map(|_| None)
            .map_err(|_| ()),
        Request::Invade { planet, attackers } => {
            let (reply, response) = bounded(1);
            sender
                .send(SimCommand::Invade {
                    attackers,
                    planet,
                    reply: Some(reply),
                })
                .map_err(|_| ())?;
            let rendered = match response.recv().map_err(|_| ())? {
                Ok(result) => to_json(&result),
                Err(err) => to_json(&ErrorLine {
                    error: err.to_string(),
                }),
            };
            Ok(Some(rendered))
        }
        Request::Stats => {
            let (reply, response) = bounded(1);
            sender.send(SimCommand::Stats { reply }).map_err(|_| ())?;
            let stats = response.recv().map_err(|_| ())?;
            Ok(Some(to_json(&stats)))
        }
        Request::Shutdown => {
            info!(target: "galaxy::server", "command.applied=shutdown");
            sender.send(SimCommand::Shutdown).map_err(|_| ())?;
            Err(())
        }
    }
}

#[derive(Serialize)]
struct ErrorLine {
    error: String,
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| format!("{{\"error\":\"{err}\"}}"))
}

fn parse_command(input: &str) -> Option<Request> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "spawn" => {
            let def_name = parts.next()?;
            let owner = EmpireId(parts.next()?.parse().ok()?);
            let location = PlanetId(parts.next()?.parse().ok()?);
            let spec = match parts.next() {
                Some("structure") => EntitySpec::structure(def_name, owner, location),
                Some("unit") | None => EntitySpec::unit(def_name, owner, location),
                Some(other) => {
                    warn!(target: "galaxy::server", kind = other, "spawn.unsupported_kind");
                    return None;
                }
            };
            Some(Request::Spawn(spec))
        }
        "target" => {
            let attacker = EntityId(parts.next()?.parse().ok()?);
            let target = match parts.next().unwrap_or("none") {
                "none" | "clear" => None,
                raw => Some(EntityId(raw.parse().ok()?)),
            };
            Some(Request::Target { attacker, target })
        }
        "invade" => {
            let planet = PlanetId(parts.next()?.parse().ok()?);
            let attackers = parts
                .flat_map(|chunk| chunk.split(','))
                .filter(|raw| !raw.is_empty())
                .map(|raw| raw.parse().ok().map(EntityId))
                .collect::<Option<Vec<_>>>()?;
            Some(Request::Invade { planet, attackers })
        }
        "stats" => Some(Request::Stats),
        "shutdown" | "quit" => Some(Request::Shutdown),
        _ => None,
    }
}
