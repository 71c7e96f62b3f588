/// Command-line front end for the sand table
///
/// One-shot moves (goto, line, steps, jog), pattern export and drawing, coordinate
/// file playback, calibration and an interactive shell.
///
/// Run with: cargo run --bin psamathe -- --profile point_to_point line --from 100,0 --to 0,100

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use log::{info, warn};

use psamathe::arduino_connection::{AnyTransport, RecordingTransport, SerialTransport};
use psamathe::calibration::{self, Jog};
use psamathe::config_loader::{self, SelectedProfile, ToolProfile};
use psamathe::controller::{MoveController, MoveOutcome};
use psamathe::error::MotionError;
use psamathe::kinematics::{self, CartesianMm, LengthUnit, MoveCommand, PolarMm};
use psamathe::machine_state_logger::{last_totals, read_journal, MoveJournal};
use psamathe::pattern::{self, Pattern, PatternPoint};
use psamathe::position_store::PositionStore;

/// Sand table motion tool (strict config; fails loudly on missing keys)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: $PSAMATHE_CONFIG, then psamathe.yaml beside Cargo.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Profile name (default: HOSTS entry for this machine, then DEFAULT_PROFILE)
    #[arg(long, global = true)]
    profile: Option<String>,
    /// Override SERIAL.PORT from the profile
    #[arg(long, global = true)]
    port: Option<String>,
    /// Print the device lines instead of opening the serial port
    #[arg(long = "dry-run", global = true, default_value_t = false)]
    dry_run: bool,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Absolute move to (theta, radius)
    Goto {
        #[arg(long, allow_hyphen_values = true)]
        theta: f64,
        #[arg(long)]
        radius: f64,
    },
    /// Point-to-point move between two "x,y" points
    Line {
        #[arg(long, allow_hyphen_values = true)]
        from: String,
        #[arg(long, allow_hyphen_values = true)]
        to: String,
        /// Points are in centimetres
        #[arg(long, default_value_t = false)]
        cm: bool,
    },
    /// Raw step counts
    Steps {
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        rotation: i32,
        #[arg(long = "in-out", default_value_t = 0, allow_hyphen_values = true)]
        in_out: i32,
    },
    /// Calibration jog (±1000 in/out, ±2000 rotation)
    Jog {
        #[arg(value_enum)]
        direction: JogDirection,
    },
    /// Put the position record back home
    Reset,
    /// Show the stored position and the last journal entry
    Totals,
    /// Show the last entries of the move journal
    History {
        #[arg(long, default_value_t = 20)]
        last: usize,
    },
    /// Compute machine constants from measured travel
    Calibrate {
        /// mm moved by the in/out test jog
        #[arg(long, allow_hyphen_values = true)]
        inout_mm: f64,
        /// mm the rack was dragged by the rotation test jog
        #[arg(long, allow_hyphen_values = true)]
        rotation_mm: f64,
        #[arg(long, default_value_t = calibration::INOUT_TEST_STEPS, allow_hyphen_values = true)]
        test_steps: i32,
    },
    /// Generate, export or draw a radial pattern
    Pattern {
        #[command(subcommand)]
        shape: Shape,
    },
    /// Draw a path from an "(x, y)" coordinate file
    RunFile {
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        cm: bool,
        #[arg(long = "scale-mm", default_value_t = 1.0)]
        scale_mm: f64,
    },
    /// Interactive session: goto / line / steps / jog / undo / reset / totals / quit
    Shell,
}

#[derive(Subcommand, Debug)]
enum Shape {
    /// r = a·(cos(nθ + d) + sin(nθ + d))
    Simple {
        #[arg(long, default_value_t = 10.0, allow_hyphen_values = true)]
        a: f64,
        #[arg(long, default_value_t = 5.0, allow_hyphen_values = true)]
        n: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        d: f64,
        #[command(flatten)]
        output: PatternOutput,
    },
    /// r = a·cos(2·asin(k)+πm) / cos(2·asin(k·cos(nθ))+πm)
    Complex {
        #[arg(long, default_value_t = 10.0, allow_hyphen_values = true)]
        a: f64,
        #[arg(long, default_value_t = 0.5, allow_hyphen_values = true)]
        k: f64,
        #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
        m: f64,
        #[arg(long, default_value_t = 5.0, allow_hyphen_values = true)]
        n: f64,
        #[command(flatten)]
        output: PatternOutput,
    },
}

#[derive(ClapArgs, Debug)]
struct PatternOutput {
    #[arg(long = "export-xy")]
    export_xy: Option<PathBuf>,
    #[arg(long = "export-rtheta")]
    export_rtheta: Option<PathBuf>,
    /// Draw the pattern on the table
    #[arg(long, default_value_t = false)]
    run: bool,
    /// Multiply pattern coordinates before drawing
    #[arg(long = "scale-mm", default_value_t = 1.0)]
    scale_mm: f64,
    /// Radius of the path's start/end point, before scaling
    #[arg(long = "boundary-mm", default_value_t = 16.0)]
    boundary_mm: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum JogDirection {
    Out,
    In,
    Forward,
    Back,
}

impl From<JogDirection> for Jog {
    fn from(d: JogDirection) -> Self {
        match d {
            JogDirection::Out => Jog::InOutOut,
            JogDirection::In => Jog::InOutIn,
            JogDirection::Forward => Jog::RotateForward,
            JogDirection::Back => Jog::RotateBack,
        }
    }
}

type Controller = MoveController<AnyTransport>;

fn unit(cm: bool) -> LengthUnit {
    if cm { LengthUnit::Cm } else { LengthUnit::Mm }
}

// Relative paths in the config are taken from the config file's directory
fn resolve(config_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() { path.to_path_buf() } else { config_dir.join(path) }
}

async fn open_transport(profile: &ToolProfile, dry_run: bool) -> Result<AnyTransport> {
    if dry_run {
        info!(target: "psamathe", "Dry run: device lines are printed, not sent");
        return Ok(AnyTransport::Recording(RecordingTransport::new()));
    }
    let serial = profile.serial.clone();
    let connected = tokio::task::spawn_blocking(move || SerialTransport::connect(&serial))
        .await
        .context("Serial connect task failed")?;
    Ok(match connected {
        Ok(t) => AnyTransport::Serial(t),
        Err(e) => {
            warn!(target: "psamathe", "{} (port {:?}); moves will be recorded but not sent", e, profile.serial.port);
            AnyTransport::Recording(RecordingTransport::disconnected())
        }
    })
}

async fn build_controller(selected: SelectedProfile, config_dir: &Path, dry_run: bool) -> Result<Controller> {
    let transport = open_transport(&selected.profile, dry_run).await?;
    let position_db = selected.profile.position_db.clone();
    let journal = selected.profile.journal.clone();
    let mut ctl = MoveController::new(&selected.name, selected.profile, transport);
    if let Some(db) = position_db {
        ctl = ctl.with_position_store(PositionStore::open(resolve(config_dir, &db))?)?;
    }
    if let Some(path) = journal {
        ctl = ctl.with_journal(MoveJournal::open(resolve(config_dir, &path))?)?;
    }
    Ok(ctl)
}

fn report(outcome: &MoveOutcome) {
    let cmd = outcome.planned.logical();
    let totals = outcome.planned.totals_after;
    println!(
        "{:?} move: rotation {} / in-out {} (totals: rotation {}, in-out {})",
        outcome.planned.kind, cmd.rotation_steps, cmd.in_out_steps, totals.rotation_steps, totals.in_out_steps
    );
    for e in &outcome.transport_errors {
        println!("  warning: {}", e);
    }
    if !outcome.settled {
        println!("  settle wait cancelled");
    }
}

fn print_dry_run(ctl: &Controller) {
    if let AnyTransport::Recording(t) = ctl.transport() {
        print!("{}", t.text());
    }
}

fn pattern_from(shape: &Shape) -> (Pattern, &PatternOutput) {
    match shape {
        Shape::Simple { a, n, d, output } => (Pattern::Simple { a: *a, n: *n, d: *d }, output),
        Shape::Complex { a, k, m, n, output } => (Pattern::Complex { a: *a, k: *k, m: *m, n: *n }, output),
    }
}

fn export(path: &Path, points: &[PatternPoint], polar: bool) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    if polar {
        pattern::write_r_theta(&mut out, points)?;
    } else {
        pattern::write_xy(&mut out, points)?;
    }
    out.flush()?;
    println!("Exported {} points to {}", points.len(), path.display());
    Ok(())
}

async fn run_points(ctl: &mut Controller, path: &[CartesianMm], stop: &AtomicBool) -> Result<()> {
    println!("Running path of {} points", path.len());
    let outcomes = ctl.run_path(path, stop).await?;
    let failed = outcomes.iter().filter(|o| !o.transport_ok()).count();
    let totals = ctl.totals();
    println!(
        "{} moves done ({} with transport errors); totals: rotation {}, in-out {}",
        outcomes.len(), failed, totals.rotation_steps, totals.in_out_steps
    );
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  goto <theta> <radius>     absolute move");
    println!("  line <x,y> <x,y> [cm]     point-to-point move");
    println!("  steps <rotation> <in-out> raw steps");
    println!("  jog out|in|forward|back   calibration jog");
    println!("  undo | reset | totals | wait | help | quit");
}

async fn shell_command(ctl: &mut Controller, line: &str) -> Result<bool> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&cmd, rest)) = words.split_first() else { return Ok(true); };
    match (cmd, rest) {
        ("quit" | "exit", _) => return Ok(false),
        ("help", _) => print_help(),
        ("goto", [theta, radius]) => {
            let target = PolarMm::new(kinematics::parse_coordinate(theta)?, kinematics::parse_coordinate(radius)?);
            report(&ctl.goto(target).await?);
        }
        ("line", [from, to]) | ("line", [from, to, _]) => {
            let u = unit(rest.get(2) == Some(&"cm"));
            let outcome = ctl.line(kinematics::parse_point(from, u)?, kinematics::parse_point(to, u)?).await?;
            report(&outcome);
        }
        ("steps", [rotation, in_out]) => {
            let cmd = MoveCommand::new(parse_steps(rotation)?, parse_steps(in_out)?);
            report(&ctl.manual(cmd).await?);
        }
        ("jog", [dir]) => {
            let dir = JogDirection::from_str(dir, true).map_err(|e| anyhow!(e))?;
            report(&ctl.manual(Jog::from(dir).command()).await?);
        }
        ("undo", []) => report(&ctl.undo().await?),
        ("reset", []) => {
            ctl.reset()?;
            println!("Totals reset");
        }
        ("totals", []) => {
            let t = ctl.totals();
            println!("rotation {}, in-out {} (phase {:?})", t.rotation_steps, t.in_out_steps, ctl.phase());
            if let Some(p) = ctl.position() {
                println!("position theta {:.2}°, radius {:.2} mm", p.theta_deg, p.radius_mm);
            }
        }
        ("wait", []) => ctl.wait_settled().await,
        _ => println!("unrecognised command '{}', try 'help'", line.trim()),
    }
    Ok(true)
}

fn parse_steps(text: &str) -> Result<i32, MotionError> {
    text.trim()
        .parse()
        .map_err(|_| MotionError::InvalidInput(format!("'{}' is not a whole number of steps", text.trim())))
}

async fn run_shell(ctl: &mut Controller) -> Result<()> {
    println!("psamathe shell (profile '{}'), 'help' for commands", ctl.profile_name());
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        // Errors end the action, not the session.
        match shell_command(ctl, &line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("Error: {:#}", e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    // Calibration needs no config or table
    if let Command::Calibrate { inout_mm, rotation_mm, test_steps } = &args.command {
        let ratio = calibration::compensation_ratio(*inout_mm, *rotation_mm)?;
        let spm = calibration::inout_steps_per_mm(*test_steps, *inout_mm)?;
        println!("Linear Ratio (step/mm) = {:.4}", spm);
        println!("Compensation Ratio (steps/rotation) = {:.4}", ratio);
        return Ok(());
    }

    let config_file = config_loader::config_path(args.config.as_deref());
    let config_dir = config_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let cfg = config_loader::load_config(Some(config_file.as_path()))?;
    let hostname = config_loader::current_hostname();
    let mut selected = cfg.select(args.profile.as_deref(), &hostname)?;
    if let Some(port) = &args.port {
        selected.profile.serial.port = Some(port.clone());
    }

    match &args.command {
        Command::History { last } => {
            let path = selected
                .profile
                .journal
                .as_ref()
                .ok_or_else(|| anyhow!("Profile '{}' has no JOURNAL", selected.name))?;
            let records = read_journal(resolve(&config_dir, path))?;
            for r in records.iter().skip(records.len().saturating_sub(*last)) {
                println!(
                    "{} {:<8} {:?} logical ({}, {}) sent ({}, {}) totals ({}, {}){}",
                    r.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    r.profile,
                    r.kind,
                    r.logical.rotation_steps,
                    r.logical.in_out_steps,
                    r.sent.rotation_steps,
                    r.sent.in_out_steps,
                    r.totals_after.rotation_steps,
                    r.totals_after.in_out_steps,
                    if r.transport_ok { String::new() } else { format!(" [{}]", r.message) }
                );
            }
            return Ok(());
        }
        Command::Totals => {
            if let Some(db) = &selected.profile.position_db {
                let record = PositionStore::open(resolve(&config_dir, db))?.load()?;
                println!("stored position theta {:.2}°, in-out {:.2} mm", record.theta, record.in_out);
            }
            if let Some(path) = &selected.profile.journal {
                match last_totals(resolve(&config_dir, path), &selected.name)? {
                    Some(t) => println!(
                        "session totals for '{}': rotation {}, in-out {}",
                        selected.name, t.rotation_steps, t.in_out_steps
                    ),
                    None => println!("no journalled moves for '{}'", selected.name),
                }
            }
            return Ok(());
        }
        _ => {}
    }

    // Pattern export alone does not need the table
    if let Command::Pattern { shape } = &args.command {
        let (pattern, output) = pattern_from(shape);
        let clip = match pattern {
            Pattern::Complex { .. } => Some(pattern::PREVIEW_CLIP_MM),
            Pattern::Simple { .. } => None,
        };
        let preview = pattern.preview(pattern::PREVIEW_SAMPLES, clip)?;
        if let Some(path) = &output.export_xy {
            export(path, &preview, false)?;
        }
        if let Some(path) = &output.export_rtheta {
            export(path, &preview, true)?;
        }
        if !output.run {
            let max_r = preview.iter().map(|p| p.r.abs()).fold(0.0, f64::max);
            println!("{:?}: {} preview points, max |r| {:.3}", pattern, preview.len(), max_r);
            return Ok(());
        }
    }

    let mut ctl = build_controller(selected, &config_dir, args.dry_run).await?;

    // Ctrl-C: cancel the settle wait and stop path runs; a second press exits.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        let settle = ctl.settle_handle();
        ctrlc::set_handler(move || {
            if stop.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            settle.cancel();
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    match &args.command {
        Command::Goto { theta, radius } => report(&ctl.goto(PolarMm::new(*theta, *radius)).await?),
        Command::Line { from, to, cm } => {
            let u = unit(*cm);
            let outcome = ctl.line(kinematics::parse_point(from, u)?, kinematics::parse_point(to, u)?).await?;
            report(&outcome);
        }
        Command::Steps { rotation, in_out } => report(&ctl.manual(MoveCommand::new(*rotation, *in_out)).await?),
        Command::Jog { direction } => report(&ctl.manual(Jog::from(*direction).command()).await?),
        Command::Reset => {
            ctl.reset()?;
            println!("Position record reset to home");
        }
        Command::RunFile { path, cm, scale_mm } => {
            let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
            let u = unit(*cm);
            let points: Vec<CartesianMm> = pattern::parse_coordinate_list(&text)?
                .into_iter()
                .map(|(x, y)| CartesianMm::new(u.to_mm(x), u.to_mm(y)))
                .collect();
            run_points(&mut ctl, &pattern::scale_points(&points, *scale_mm), &stop).await?;
        }
        Command::Pattern { shape } => {
            let (pattern, output) = pattern_from(shape);
            let samples = pattern.sample_for_machine(pattern::MACHINE_ROTATION_STEP_DEG, ctl.profile().machine.inout_steps_per_mm)?;
            let points: Vec<CartesianMm> = samples.iter().map(PatternPoint::to_cartesian).collect();
            let path = pattern::build_path(&points, output.boundary_mm)?;
            run_points(&mut ctl, &pattern::scale_points(&path, output.scale_mm), &stop).await?;
        }
        Command::Shell => run_shell(&mut ctl).await?,
        Command::Calibrate { .. } | Command::History { .. } | Command::Totals => {}
    }

    if args.dry_run {
        print_dry_run(&ctl);
    }
    Ok(())
}
