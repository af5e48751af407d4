#![deny(warnings)]

//! Headless command line driver for the journey.
//!
//! Every invocation starts a fresh session over the persisted stores, applies
//! one command and exits.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clock_gate::{wait_for_unlock, Clock, GateConfig, Remaining, SystemClock};
use journey_core::{Catalog, Lang};
use persistence::{data_dir_from_env, FileKv};
use session::{Outcome, Session};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use unlock::StepStatus;

const USAGE: &str = "usage: journey [--data-dir DIR] [--catalog FILE] [--lang en|ru] [--json] \
<status | countdown [--wait] | open ID | complete ID | collect ID | reset | catalog>";

#[derive(Debug, PartialEq)]
enum Command {
    Status,
    Countdown { wait: bool },
    Open(String),
    Complete(String),
    Collect(String),
    Reset,
    Catalog,
    Version,
}

#[derive(Debug, PartialEq)]
struct Args {
    data_dir: Option<PathBuf>,
    catalog: Option<PathBuf>,
    lang: Option<Lang>,
    json: bool,
    command: Command,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut data_dir = None;
    let mut catalog = None;
    let mut lang = None;
    let mut json = false;
    let mut wait = false;
    let mut version = false;
    let mut words: Vec<String> = Vec::new();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--data-dir" => data_dir = it.next().map(PathBuf::from),
            "--catalog" => catalog = it.next().map(PathBuf::from),
            "--lang" => {
                let code = it.next().unwrap_or_default();
                let parsed = Lang::from_code(&code);
                lang = Some(parsed.ok_or_else(|| anyhow!("unknown language {code:?}"))?);
            }
            "--json" => json = true,
            "--wait" => wait = true,
            "--version" | "-V" => version = true,
            _ => words.push(arg),
        }
    }
    let command = if version {
        Command::Version
    } else {
        let mut words = words.into_iter();
        let verb = words.next().unwrap_or_else(|| "status".to_string());
        let mut id = || words.next().ok_or_else(|| anyhow!("{verb} needs a step id\n{USAGE}"));
        match verb.as_str() {
            "status" => Command::Status,
            "countdown" => Command::Countdown { wait },
            "open" => Command::Open(id()?),
            "complete" => Command::Complete(id()?),
            "collect" => Command::Collect(id()?),
            "reset" => Command::Reset,
            "catalog" => Command::Catalog,
            other => bail!("unknown command {other:?}\n{USAGE}"),
        }
    };
    Ok(Args {
        data_dir,
        catalog,
        lang,
        json,
        command,
    })
}

fn load_catalog(path: Option<&PathBuf>) -> Result<Catalog> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("reading catalog {}", p.display()))?;
            Catalog::from_yaml(&text).with_context(|| format!("loading catalog {}", p.display()))
        }
        None => Ok(Catalog::builtin()?),
    }
}

type CliSession = Session<FileKv, SystemClock>;

fn countdown_line(session: &CliSession, r: Remaining) -> String {
    session.label(
        "countdown",
        &[
            ("days", r.days.to_string()),
            ("hours", r.hours.to_string()),
            ("minutes", r.minutes.to_string()),
            ("seconds", r.seconds.to_string()),
        ],
    )
}

fn report(session: &CliSession, outcome: Outcome) {
    match outcome {
        Outcome::Applied => {}
        Outcome::Ignored | Outcome::Busy => println!("{}", session.label("ignored", &[])),
    }
}

/// Enter `id` from the overview, as a tap on the map would.
fn enter(session: &mut CliSession, id: &str) -> Outcome {
    let outcome = session.open_step(id);
    session.settle();
    outcome
}

fn print_status(session: &CliSession, json: bool) -> Result<()> {
    let status = session.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    let lang = session.language();
    if session.is_locked() {
        println!(
            "{} {}",
            session.label("locked", &[]),
            countdown_line(session, session.remaining())
        );
    }
    for row in &status.steps {
        let city = session
            .catalog()
            .get(row.id.as_str())
            .map(|s| s.city.get(lang).to_string())
            .unwrap_or_default();
        let key = match row.status {
            StepStatus::Completed => "status.completed",
            StepStatus::Open => "status.open",
            StepStatus::Locked => "status.locked",
        };
        let heart = if row.heart_found { " ♥" } else { "" };
        println!("{:>2}. {:<12} {}{}", row.order, city, session.label(key, &[]), heart);
    }
    println!(
        "{} | {}",
        session.label(
            "progress",
            &[
                ("done", status.completed.to_string()),
                ("total", status.total.to_string())
            ]
        ),
        session.label(
            "heartsFound",
            &[
                ("found", status.hearts_found.to_string()),
                ("total", status.total.to_string())
            ]
        )
    );
    match session.current().step() {
        Some(step) => println!(
            "{}",
            session.label("current", &[("city", step.city.get(lang).to_string())])
        ),
        None => println!("{}", session.label("journeyComplete", &[])),
    }
    Ok(())
}

fn countdown(session: &CliSession, wait: bool) -> Result<()> {
    let gate = session.gate();
    if let Some(target) = gate.target() {
        debug!(target = %target.with_timezone(&Local), "unlock target");
    }
    if !session.is_locked() {
        println!("{}", session.label("unlocked", &[]));
        return Ok(());
    }
    println!(
        "{} {}",
        session.label("locked", &[]),
        countdown_line(session, session.remaining())
    );
    if wait {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        rt.block_on(wait_for_unlock(gate, &SystemClock, |r| {
            println!("{}", countdown_line(session, r));
        }));
        println!("{}", session.label("unlocked", &[]));
    }
    Ok(())
}

fn print_catalog(session: &CliSession) {
    let lang = session.language();
    for step in session.catalog().steps() {
        println!(
            "{:>2}. {:<10} {}, {} ({:.4}, {:.4})",
            step.order,
            step.id,
            step.city.get(lang),
            step.country.get(lang),
            step.lat,
            step.lng
        );
    }
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.command == Command::Version {
        println!(
            "journey {} ({} {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }

    let catalog = load_catalog(args.catalog.as_ref())?;
    let data_dir = args.data_dir.clone().unwrap_or_else(data_dir_from_env);
    let kv = FileKv::open(&data_dir)
        .with_context(|| format!("opening data directory {}", data_dir.display()))?;
    let gate = GateConfig::from_env().gate();
    info!(dir = %data_dir.display(), steps = catalog.len(), overridden = gate.is_overridden(), "starting CLI");

    let mut session = Session::start(catalog, kv, gate, SystemClock);
    if let Some(lang) = args.lang {
        session.set_language(lang)?;
    }
    debug!(now = %SystemClock.now(), "clock");

    match args.command {
        Command::Status => print_status(&session, args.json)?,
        Command::Countdown { wait } => countdown(&session, wait)?,
        Command::Open(id) => {
            let outcome = enter(&mut session, &id);
            report(&session, outcome);
            if let Some(step) = session.active_step() {
                let lang = session.language();
                println!(
                    "{} | {}",
                    step.city.get(lang),
                    session.label(
                        "stepOf",
                        &[
                            ("n", step.order.to_string()),
                            ("total", session.catalog().len().to_string())
                        ]
                    )
                );
                println!("{}", step.card_text.get(lang));
                println!();
                println!("{}", step.quiz.question.get(lang));
                for (i, option) in step.quiz.options.iter().enumerate() {
                    println!("  {}) {}", i + 1, option.text.get(lang));
                }
            }
        }
        Command::Complete(id) => {
            let mut outcome = enter(&mut session, &id);
            if outcome == Outcome::Applied {
                outcome = session.complete(&id)?;
            }
            report(&session, outcome);
            if session.celebration_visible() {
                println!("{}", session.label("journeyComplete", &[]));
            } else if outcome == Outcome::Applied {
                print_status(&session, args.json)?;
            }
        }
        Command::Collect(id) => {
            let mut outcome = enter(&mut session, &id);
            if outcome == Outcome::Applied {
                outcome = session.collect_heart(&id)?;
            }
            report(&session, outcome);
            if outcome == Outcome::Applied {
                println!("{}", session.label("heartCollected", &[]));
            }
        }
        Command::Reset => {
            session.reset()?;
            println!("{}", session.label("resetDone", &[]));
        }
        Command::Catalog => print_catalog(&session),
        Command::Version => {}
    }
    Ok(())
}
