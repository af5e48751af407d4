#![deny(warnings)]

//! Headless HUD over the journey session.
//!
//! Pointer and sensor input arrive as `UiIntent` events; systems apply them to
//! the session and refresh a text HUD. Each command line argument is one
//! intent, e.g. `journey-frontend open:sarajevo complete:sarajevo summary`.

use bevy_ecs::prelude::*;
use clock_gate::{Clock, CountdownObserver, GateConfig, GateEvent, SystemClock};
use journey_core::Catalog;
use persistence::{data_dir_from_env, FileKv};
use session::{Outcome, Session, SessionError, ShakeDetector, View};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type AppSession = Session<FileKv, SystemClock>;

#[derive(Resource)]
struct SessionRes(AppSession);

#[derive(Resource)]
struct Countdown(CountdownObserver);

#[derive(Resource, Default)]
struct Shake(ShakeDetector);

#[derive(Resource, Default)]
struct HudState {
    heading: String,
    countdown: String,
    progress: String,
    hearts: String,
    notice: String,
    last_outcome: Option<Outcome>,
    frames: u32,
}

#[derive(Event, Clone, Debug, PartialEq)]
enum UiIntent {
    Open(String),
    Complete(String),
    Back,
    OpenSummary,
    CloseSummary,
    CollectHeart(String),
    Shake { at_ms: i64, x: f64, y: f64, z: f64 },
    DismissSecret,
    /// The renderer finished the running hand-off animation.
    Settle,
    Reset,
}

fn parse_intent(arg: &str, at_ms: i64) -> Option<UiIntent> {
    let (verb, id) = match arg.split_once(':') {
        Some((verb, id)) => (verb, Some(id.to_string())),
        None => (arg, None),
    };
    let intent = match (verb, id) {
        ("open", Some(id)) => UiIntent::Open(id),
        ("complete", Some(id)) => UiIntent::Complete(id),
        ("heart", Some(id)) => UiIntent::CollectHeart(id),
        ("back", None) => UiIntent::Back,
        ("summary", None) => UiIntent::OpenSummary,
        ("close-summary", None) => UiIntent::CloseSummary,
        ("shake", None) => UiIntent::Shake {
            at_ms,
            x: 40.0,
            y: 0.0,
            z: 0.0,
        },
        ("dismiss-secret", None) => UiIntent::DismissSecret,
        ("settle", None) => UiIntent::Settle,
        ("reset", None) => UiIntent::Reset,
        _ => return None,
    };
    Some(intent)
}

fn poll_gate_system(
    mut countdown: ResMut<Countdown>,
    mut session: ResMut<SessionRes>,
    mut hud: ResMut<HudState>,
) {
    if !session.0.is_locked() {
        return;
    }
    let Some(event) = countdown.0.poll(SystemClock.now()) else {
        return;
    };
    if let GateEvent::Tick(r) = event {
        let text = session.0.label(
            "countdown",
            &[
                ("days", r.days.to_string()),
                ("hours", r.hours.to_string()),
                ("minutes", r.minutes.to_string()),
                ("seconds", r.seconds.to_string()),
            ],
        );
        hud.countdown = text;
    }
    session.0.on_gate_event(event);
}

fn apply(
    session: &mut AppSession,
    shake: &mut ShakeDetector,
    intent: &UiIntent,
) -> Result<Outcome, SessionError> {
    let outcome = match intent {
        UiIntent::Open(id) => session.open_step(id),
        UiIntent::Complete(id) => session.complete(id)?,
        UiIntent::Back => session.back(),
        UiIntent::OpenSummary => session.open_summary(),
        UiIntent::CloseSummary => session.close_summary(),
        UiIntent::CollectHeart(id) => session.collect_heart(id)?,
        UiIntent::Shake { at_ms, x, y, z } => match shake.sample(*at_ms, *x, *y, *z) {
            Some(event) => session.on_observer_event(event)?,
            None => Outcome::Ignored,
        },
        UiIntent::DismissSecret => {
            session.dismiss_secret();
            Outcome::Applied
        }
        UiIntent::Settle => {
            session.settle();
            Outcome::Applied
        }
        UiIntent::Reset => session.reset()?,
    };
    Ok(outcome)
}

fn apply_intents_system(
    mut intents: EventReader<UiIntent>,
    mut session: ResMut<SessionRes>,
    mut shake: ResMut<Shake>,
    mut hud: ResMut<HudState>,
) {
    for intent in intents.read() {
        match apply(&mut session.0, &mut shake.0, intent) {
            Ok(outcome) => hud.last_outcome = Some(outcome),
            Err(e) => {
                warn!(error = %e, ?intent, "intent failed");
                hud.last_outcome = None;
            }
        }
    }
}

fn refresh_hud_system(mut session: ResMut<SessionRes>, mut hud: ResMut<HudState>) {
    let s = &mut session.0;
    for event in s.drain_events() {
        info!(?event, "session event");
    }
    let status = s.status();
    let heading = match s.view() {
        View::Locked => format!("{} {}", s.label("locked", &[]), hud.countdown),
        View::Overview => match s.current().step() {
            Some(step) => s.label(
                "current",
                &[("city", step.city.get(s.language()).to_string())],
            ),
            None => s.label("journeyComplete", &[]),
        },
        View::StepDetail(id) => match s.catalog().get(id.as_str()) {
            Some(step) => format!(
                "{} | {}",
                step.city.get(s.language()),
                s.label(
                    "stepOf",
                    &[
                        ("n", step.order.to_string()),
                        ("total", status.total.to_string()),
                    ],
                )
            ),
            None => String::new(),
        },
        View::SummaryList => format!(
            "{} | {}",
            s.label("ticketsTitle", &[]),
            s.label(
                "progress",
                &[
                    ("done", status.completed.to_string()),
                    ("total", status.total.to_string()),
                ],
            )
        ),
    };
    let progress = s.label(
        "progress",
        &[
            ("done", status.completed.to_string()),
            ("total", status.total.to_string()),
        ],
    );
    let hearts = s.label(
        "heartsFound",
        &[
            ("found", status.hearts_found.to_string()),
            ("total", status.total.to_string()),
        ],
    );
    let notice = match hud.last_outcome {
        Some(Outcome::Ignored | Outcome::Busy) => s.label("ignored", &[]),
        _ => match s.secret_message() {
            Some(i) => s.label(&format!("secret.{i}"), &[]),
            None => String::new(),
        },
    };
    hud.heading = heading;
    hud.progress = progress;
    hud.hearts = hearts;
    hud.notice = notice;
}

fn build_world(session: AppSession) -> World {
    let mut world = World::new();
    world.insert_resource(Countdown(session.countdown()));
    world.insert_resource(SessionRes(session));
    world.init_resource::<Shake>();
    world.init_resource::<HudState>();
    world.init_resource::<Events<UiIntent>>();
    world
}

fn build_schedule() -> bevy_ecs::schedule::Schedule {
    let mut schedule = bevy_ecs::schedule::Schedule::default();
    schedule.add_systems((poll_gate_system, apply_intents_system, refresh_hud_system).chain());
    schedule
}

fn push_intent(world: &mut World, intent: UiIntent) {
    let _ = world.send_event(intent);
}

fn frame(world: &mut World, schedule: &mut bevy_ecs::schedule::Schedule) {
    schedule.run(world);
    world.resource_mut::<Events<UiIntent>>().update();
    world.resource_mut::<HudState>().frames += 1;
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let catalog = Catalog::builtin()?;
    let kv = FileKv::open(data_dir_from_env())?;
    let gate = GateConfig::from_env().gate();
    let session = Session::start(catalog, kv, gate, SystemClock);

    let mut world = build_world(session);
    let mut schedule = build_schedule();
    frame(&mut world, &mut schedule);

    for arg in std::env::args().skip(1) {
        let now = SystemClock.now().timestamp_millis();
        let Some(intent) = parse_intent(&arg, now) else {
            warn!(arg = %arg, "unknown intent");
            continue;
        };
        push_intent(&mut world, intent);
        frame(&mut world, &mut schedule);
        // headless: no animation to wait for
        push_intent(&mut world, UiIntent::Settle);
        frame(&mut world, &mut schedule);
    }

    let hud = world.resource::<HudState>();
    println!(
        "journey-frontend: {} | {} | {} | frames={}",
        hud.heading, hud.progress, hud.hearts, hud.frames
    );
    if !hud.notice.is_empty() {
        println!("{}", hud.notice);
    }
    Ok(())
}
