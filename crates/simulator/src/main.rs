use std::time::Duration;

use clap::Parser;
use gowired_protocol::{Cmd, Report};
use gowired_shutter::{ConfigBuilder, RelayPolarity};
use indicatif::ProgressBar;
use reedline::{DefaultPrompt, DefaultPromptSegment, Prompt, Reedline};

use crate::command::Line;
use crate::motor::MotorParams;
use crate::sim::{describe, Rating, Simulation};

mod command;
mod motor;
mod sim;

const TICK: Duration = Duration::from_millis(80);

/// Runs a simulated shutter node. Time only passes during `wait` and while
/// a calibration runs.
#[derive(Parser)]
struct Args {
    /// How long the simulated motor takes to go all the way up, in seconds.
    #[arg(long, default_value_t = 19.4)]
    up: f64,
    /// How long the simulated motor takes to go all the way down, in seconds.
    #[arg(long, default_value_t = 21.3)]
    down: f64,
    /// Where the shutter starts, in percent.
    #[arg(long, default_value_t = 0.0)]
    start: f64,
    /// Enable current-sensing auto calibration.
    #[arg(long)]
    auto: bool,
    /// Round trips averaged by auto calibration.
    #[arg(long, default_value_t = 2)]
    samples: u8,
    /// Stall current threshold in amps.
    #[arg(long, default_value_t = 0.2)]
    threshold: f32,
    /// Simulation step in ms.
    #[arg(long, default_value_t = 10)]
    tick_ms: u32,
    /// Relays switch on with a low output.
    #[arg(long)]
    active_low: bool,
    /// Current the simulated motor draws while running, in amps.
    #[arg(long, default_value_t = 0.9)]
    motor_amps: f32,
    /// Mains voltage, for the power readout.
    #[arg(long, default_value_t = 230.0)]
    volts: f32,
    /// Most current the relays are rated for, in amps.
    #[arg(long, default_value_t = 3.0)]
    max_amps: f32,
}

#[derive(Debug)]
enum Error {
    Exit,
    Err(anyhow::Error),
}

impl<E> From<E> for Error
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Error::Err(e.into())
    }
}

type Result<T> = std::result::Result<T, Error>;

fn read_cmd(reed: &mut Reedline, prompt: &dyn Prompt) -> Result<String> {
    let s = reed.read_line(prompt)?;
    match s {
        reedline::Signal::Success(s) => Ok(s),
        reedline::Signal::CtrlC | reedline::Signal::CtrlD => Err(Error::Exit),
    }
}

fn print_reports(reports: &[Report]) {
    for report in reports {
        eprintln!("  {}", describe(report));
    }
}

fn wait_for_calibration(sim: &mut Simulation) -> anyhow::Result<()> {
    let bar = ProgressBar::new_spinner().with_message("Calibrating...");
    bar.enable_steady_tick(TICK);
    let mut reports = Vec::new();
    while sim.is_calibrating() {
        reports.extend(sim.tick()?);
        if sim.now().0 % 1000 == 0 {
            bar.set_message(format!(
                "Calibrating... motor at {:.0}%",
                sim.bench().motor().position()
            ));
        }
    }
    bar.finish_with_message(format!("done after {} s", sim.now().0 / 1000));
    print_reports(&reports);
    if let Some(times) = sim.shutter().travel_times() {
        eprintln!("travel times: up {}s, down {}s", times.up(), times.down());
    }
    Ok(())
}

fn command_mode(sim: &mut Simulation, rating: Rating) -> Result<()> {
    let mut reed = Reedline::create();
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("shutter".to_owned()),
        DefaultPromptSegment::Empty,
    );
    loop {
        let s = read_cmd(&mut reed, &prompt)?;
        let line = match command::parse(&s) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("error: {e:#}");
                continue;
            }
        };
        match line {
            Line::Quit => return Ok(()),
            Line::Empty => {}
            Line::Help => eprintln!("{}", command::HELP),
            Line::Status => {
                print_reports(&sim.send(Cmd::QueryStatus)?);
                let motor = sim.bench().motor();
                eprintln!(
                    "  motor at {:.1}%{}",
                    motor.position(),
                    if motor.is_running() { ", running" } else { "" }
                );
                if motor.faults() > 0 {
                    eprintln!("  both relays were on {} times!", motor.faults());
                }
                let supply = sim.supply(rating);
                eprintln!("  drawing {:.2} A ({:.0} W)", supply.amps, supply.watts);
                if supply.overloaded {
                    eprintln!("  over the {} A rating!", rating.max_amps);
                }
            }
            Line::Wait { ms } => print_reports(&sim.run_for(ms)?),
            Line::Settle => print_reports(&sim.run_until_idle(600_000)?),
            Line::Send(cmd) => {
                print_reports(&sim.send(cmd)?);
                if sim.is_calibrating() {
                    wait_for_calibration(sim)?;
                }
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let motor = MotorParams {
        up_ms: (args.up * 1000.0) as u32,
        down_ms: (args.down * 1000.0) as u32,
        running_amps: args.motor_amps,
        ..MotorParams::default()
    };
    let polarity = if args.active_low {
        RelayPolarity::ActiveLow
    } else {
        RelayPolarity::ActiveHigh
    };
    let config = ConfigBuilder::default()
        .with_polarity(polarity)
        .with_auto_calibration(args.auto)
        .with_calibration_samples(args.samples)
        .with_current_threshold(args.threshold)
        .build();

    let mut sim = Simulation::new(motor, config, args.tick_ms, args.start)?;
    eprintln!("simulated shutter ready, type help for commands");
    let rating = Rating {
        volts: args.volts,
        max_amps: args.max_amps,
    };
    match command_mode(&mut sim, rating) {
        Ok(()) | Err(Error::Exit) => eprintln!("exiting..."),
        Err(Error::Err(e)) => return Err(e),
    }
    Ok(())
}
