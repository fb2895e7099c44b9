//! # GAIT Link Simulation
//!
//! Runs one predicted actor against an authority over a simulated link
//! (or real loopback UDP) and reports how often prediction had to yield.
//!
//! ## Usage
//!
//! ```bash
//! gait_sim --preset regular --ticks 3600 --seed 42
//! gait_sim --config gait.toml --udp
//! RUST_LOG=gait_networking=debug gait_sim --preset low_end
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;

use gait_core::{Aabb, PlaneWorld, Simulator};
use gait_networking::transport::TransportResult;
use gait_networking::{
    Authority, ClientSession, LinkConditions, LossyLink, Reliability, SessionError, TickClock, Transport, UdpLink,
};
use gait_shared::{
    ActionFlags, ActorId, GaitConfig, InputCommand, MovementEvent, MovementMode, MovementState, NetworkPreset, NullSink,
    TickId, Vec2, Vec3,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

const ACTOR: ActorId = ActorId(1);

struct Options {
    config_path: Option<String>,
    preset: Option<NetworkPreset>,
    ticks: u32,
    seed: u64,
    udp: bool,
}

fn parse_preset(name: &str) -> Option<NetworkPreset> {
    match name {
        "lan" => Some(NetworkPreset::Lan),
        "competitive" => Some(NetworkPreset::Competitive),
        "regular" => Some(NetworkPreset::Regular),
        "low_end" | "low-end" => Some(NetworkPreset::LowEnd),
        "custom" => Some(NetworkPreset::Custom),
        _ => None,
    }
}

fn parse_args() -> Option<Options> {
    // Simple parsing, no external deps
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options { config_path: None, preset: None, ticks: 3600, seed: 42, udp: false };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--config" | "-c" => {
                options.config_path = value.cloned();
                i += 1;
            }
            "--preset" | "-p" => {
                options.preset = value.and_then(|v| parse_preset(v));
                i += 1;
            }
            "--ticks" | "-t" => {
                options.ticks = value.and_then(|v| v.parse().ok()).unwrap_or(options.ticks);
                i += 1;
            }
            "--seed" | "-s" => {
                options.seed = value.and_then(|v| v.parse().ok()).unwrap_or(options.seed);
                i += 1;
            }
            "--udp" => options.udp = true,
            "--help" | "-h" => {
                println!("Usage: gait_sim [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>      TOML configuration");
                println!("  -p, --preset <NAME>      lan | competitive | regular | low_end | custom");
                println!("  -t, --ticks <N>          Ticks to simulate (default: 3600)");
                println!("  -s, --seed <N>           Seed for link and pilot (default: 42)");
                println!("      --udp                Real UDP on 127.0.0.1, real time");
                println!("  -h, --help               Show this help");
                return None;
            }
            other => tracing::warn!("ignoring unknown argument {}", other),
        }
        i += 1;
    }
    Some(options)
}

fn demo_world() -> PlaneWorld {
    PlaneWorld::flat(0.0)
        .with_obstacle(Aabb::new(Vec3::new(4.0, 0.0, -3.0), Vec3::new(5.0, 2.5, 3.0)))
        .with_obstacle(Aabb::new(Vec3::new(-8.0, 0.0, 6.0), Vec3::new(-3.0, 0.5, 10.0)))
        .with_obstacle(Aabb::new(Vec3::new(-20.0, 0.0, 20.0), Vec3::new(20.0, 3.0, 21.0)))
}

/// Random but reproducible steering.
struct Pilot {
    rng: ChaCha8Rng,
    axes: Vec2,
}

impl Pilot {
    fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed ^ 0x9E37_79B9), axes: Vec2::new(0.0, 1.0) }
    }

    fn input(&mut self, tick: TickId) -> InputCommand {
        if tick % 45 == 0 {
            self.axes = Vec2::new(self.rng.gen_range(-1.0..=1.0), self.rng.gen_range(-1.0..=1.0));
        }
        let mut flags = ActionFlags::NONE;
        if self.rng.gen_bool(0.02) {
            flags = flags | ActionFlags::JUMP;
        }
        if self.rng.gen_bool(0.3) {
            flags = flags | ActionFlags::SPRINT;
        }
        InputCommand::new(tick, self.axes, flags).with_timestamp(tick.wrapping_mul(16))
    }
}

#[derive(Default)]
struct Report {
    mode_changes: u64,
    reconciled: u64,
    desyncs: u64,
    max_error: f32,
}

impl Report {
    fn absorb(&mut self, events: &mut Vec<MovementEvent>) {
        for event in events.drain(..) {
            match event {
                MovementEvent::ModeChanged { .. } => self.mode_changes += 1,
                MovementEvent::Reconciled { result, .. } => {
                    self.reconciled += 1;
                    self.max_error = self.max_error.max(result.position_error);
                }
                MovementEvent::Desynced { .. } => self.desyncs += 1,
            }
        }
    }
}

/// One tick of the predicting client.
fn client_tick<T: Transport>(
    client: &mut ClientSession,
    pilot: &mut Pilot,
    world: &PlaneWorld,
    transport: &mut T,
    events: &mut Vec<MovementEvent>,
) -> Result<(), SessionError> {
    while let Some(bytes) = transport.receive() {
        let _ = client.receive(&bytes, world, events);
    }

    let tick = client.next_tick(ACTOR).ok_or(SessionError::UnknownActor(ACTOR))?;
    client.predict(ACTOR, pilot.input(tick), world, events)?;
    if let Some(bytes) = client.poll_send(ACTOR)? {
        if let Err(err) = transport.send(&bytes, Reliability::Unreliable) {
            tracing::warn!("client send failed: {}", err);
        }
    }
    Ok(())
}

/// One tick of the authority.
fn authority_tick<T: Transport>(authority: &mut Authority, world: &PlaneWorld, transport: &mut T) -> TransportResult<()> {
    while let Some(bytes) = transport.receive() {
        let _ = authority.receive(&bytes);
    }
    for out in authority.tick(world, &mut NullSink) {
        transport.send(&out.bytes, out.reliability)?;
    }
    Ok(())
}

fn print_report(client: &ClientSession, authority: &Authority, report: &Report) {
    let stats = client.stats();
    let authority_stats = authority.stats();
    let predicted = client.state(ACTOR).unwrap_or_default();
    let authoritative = authority.state(ACTOR).unwrap_or_default();

    println!("┌─ RESULTS ───────────────────────────────────────────────────────┐");
    println!("│ Reconciliations:    {}", report.reconciled);
    println!("│   accepted:         {}", stats.accepted);
    println!("│   corrected:        {}", stats.corrected);
    println!("│   desynced:         {}", stats.desynced);
    println!("│ Correction rate:    {:.2}%", stats.correction_rate() * 100.0);
    println!("│ Max position error: {:.4}", report.max_error);
    println!("│ Stale records:      {}", stats.stale_records);
    println!("│ Duplicates:         {}", stats.duplicate_datagrams);
    println!("│ Inputs applied:     {}", authority_stats.inputs_applied);
    println!("│ Inputs repeated:    {}", authority_stats.inputs_repeated);
    println!("│ Timeline resyncs:   {}", authority_stats.timeline_resyncs);
    println!("│ Batches acked/lost: {}/{}", stats.datagrams_acked, stats.datagrams_lost);
    println!("│ Mode changes:       {}", report.mode_changes);
    println!("│ Desync events:      {}", report.desyncs);
    println!("│ Predicted:          tick {} at {:?}", predicted.tick, predicted.position.to_array());
    println!("│ Authoritative:      tick {} at {:?}", authoritative.tick, authoritative.position.to_array());
    println!("└──────────────────────────────────────────────────────────────────┘");
}

fn setup(config: &GaitConfig) -> Result<(ClientSession, Authority), SessionError> {
    let simulator = Simulator::default();
    let spawn = MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 0);
    let mut client = ClientSession::new(config.clone(), simulator.clone());
    client.add_actor(ACTOR, spawn)?;
    let mut authority = Authority::new(config.clone(), simulator);
    authority.add_actor(ACTOR, spawn);
    Ok((client, authority))
}

fn run_simulated(config: &GaitConfig, options: &Options) -> Result<(), SessionError> {
    let conditions = LinkConditions::for_preset(config.preset);
    println!("Link: {:?}", conditions);

    let world = demo_world();
    let (mut client, mut authority) = setup(config)?;
    let (link, mut client_end, mut authority_end) = LossyLink::pair(conditions, options.seed);
    let mut pilot = Pilot::new(options.seed);
    let mut events = Vec::new();
    let mut report = Report::default();

    let tick_ms = f64::from(config.tick_millis());
    let mut elapsed_ms = 0.0f64;
    for _ in 0..options.ticks {
        client_tick(&mut client, &mut pilot, &world, &mut client_end, &mut events)?;
        if let Err(err) = authority_tick(&mut authority, &world, &mut authority_end) {
            tracing::warn!("authority send failed: {}", err);
        }
        let _ = client.rendered_transform(ACTOR, config.tick_millis());
        report.absorb(&mut events);

        elapsed_ms += tick_ms;
        let target = elapsed_ms as u64;
        link.advance(target.saturating_sub(link.now_ms()));
    }

    let link_stats = link.stats();
    println!(
        "Link: sent {} dropped {} duplicated {} delivered {}",
        link_stats.sent, link_stats.dropped, link_stats.duplicated, link_stats.delivered
    );
    print_report(&client, &authority, &report);
    Ok(())
}

fn run_udp(config: &GaitConfig, options: &Options) -> Result<(), Box<dyn std::error::Error>> {
    let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
    let mut authority_link = UdpLink::bind(loopback)?;
    let mut client_link = UdpLink::bind(loopback)?;
    client_link.set_peer(authority_link.local_addr());
    println!("Authority on {}, client on {}", authority_link.local_addr(), client_link.local_addr());

    let world = demo_world();
    let (mut client, mut authority) = setup(config)?;
    let mut pilot = Pilot::new(options.seed);
    let mut events = Vec::new();
    let mut report = Report::default();
    let mut clock = TickClock::new(config.tick_rate_hz);

    while clock.tick_count() < u64::from(options.ticks) {
        clock.wait_for_next_tick();
        while clock.should_tick() && clock.tick_count() < u64::from(options.ticks) {
            let start = clock.begin_tick();
            client_tick(&mut client, &mut pilot, &world, &mut client_link, &mut events)?;
            if let Err(err) = authority_tick(&mut authority, &world, &mut authority_link) {
                tracing::warn!("authority send failed: {}", err);
            }
            let _ = client.rendered_transform(ACTOR, config.tick_millis());
            report.absorb(&mut events);
            clock.end_tick(start);
        }
    }

    let timing = clock.stats();
    println!("Ticks: avg {} µs, worst {} µs, overruns {}", timing.average_us, timing.worst_us, timing.overruns);
    print_report(&client, &authority, &report);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Some(options) = parse_args() else {
        return ExitCode::SUCCESS;
    };

    let mut config = match &options.config_path {
        Some(path) => match GaitConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        },
        None => GaitConfig::default(),
    };
    if let Some(preset) = options.preset {
        config.preset = preset;
        config.apply_preset();
    }
    if let Err(err) = config.validate() {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         GAIT LINK SIMULATION                                     ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!("Preset: {:?}, {} Hz, {} ticks, seed {}", config.preset, config.tick_rate_hz, options.ticks, options.seed);

    let outcome = if options.udp {
        run_udp(&config, &options)
    } else {
        run_simulated(&config, &options).map_err(Into::into)
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("simulation failed: {err}");
            ExitCode::FAILURE
        }
    }
}
