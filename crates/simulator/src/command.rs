use anyhow::{anyhow, bail, Context as _};
use gowired_dimmer::parse_color;
use gowired_protocol::{Cmd, DimmerAction, HeatingAction, Id, ShutterAction};

use crate::sim::{DIMMER_ID, HEATING_SENSORS, SHUTTER_ID};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Line {
    Send(Cmd),
    Wait { ms: u32 },
    Settle,
    Status,
    Help,
    Quit,
    Empty,
}

pub const HELP: &str = "\
up | down | stop          move the shutter
go <pct>                  move the shutter to a position
calibrate <up> <down>     enter travel times in seconds
auto                      calibrate by sensing the motor current
dim <pct> | light on|off  dimmer level and switch
color <RRGGBB|#RRGGBBWW>  dimmer colour
setpoint <sensor> <°C>    heating section setpoint (sensors 11 and 12)
temp <sensor> <°C>        a reading from a room sensor
heating on|off            heating master switch
hysteresis <°C>           how far above the setpoint heating stops
status                    query the node
wait [<s>]                let simulated time pass, or run until idle
quit";

fn shutter(action: ShutterAction) -> Line {
    Line::Send(Cmd::Shutter {
        id: SHUTTER_ID,
        action,
    })
}

fn dimmer(action: DimmerAction) -> Line {
    Line::Send(Cmd::Dimmer {
        id: DIMMER_ID,
        action,
    })
}

// Master switch and hysteresis are shared by all sections, so any of them
// will do.
fn heating(action: HeatingAction) -> Line {
    Line::Send(Cmd::Heating {
        id: HEATING_SENSORS[0],
        action,
    })
}

fn percent(arg: Option<&str>) -> anyhow::Result<u8> {
    let arg = arg.ok_or_else(|| anyhow!("expected a percentage"))?;
    let pct: u8 = arg
        .trim_end_matches('%')
        .parse()
        .with_context(|| format!("bad percentage {arg:?}"))?;
    if pct > 100 {
        bail!("{pct}% is more than 100%");
    }
    Ok(pct)
}

fn sensor(arg: Option<&str>) -> anyhow::Result<Id> {
    let arg = arg.ok_or_else(|| anyhow!("expected a sensor id"))?;
    arg.parse().with_context(|| format!("bad sensor id {arg:?}"))
}

// In tenths of a degree.
fn celsius(arg: Option<&str>) -> anyhow::Result<i16> {
    let arg = arg.ok_or_else(|| anyhow!("expected a temperature"))?;
    let degrees: f64 = arg
        .trim_end_matches("°C")
        .parse()
        .with_context(|| format!("bad temperature {arg:?}"))?;
    if !(-50.0..=100.0).contains(&degrees) {
        bail!("{degrees} °C is not a room temperature");
    }
    Ok((degrees * 10.0).round() as i16)
}

fn seconds(arg: Option<&str>) -> anyhow::Result<u8> {
    let arg = arg.ok_or_else(|| anyhow!("expected a time in seconds"))?;
    arg.parse()
        .with_context(|| format!("bad travel time {arg:?}"))
}

pub fn parse(input: &str) -> anyhow::Result<Line> {
    let mut words = input.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(Line::Empty);
    };
    let line = match word {
        "up" => shutter(ShutterAction::Up),
        "down" => shutter(ShutterAction::Down),
        "stop" => shutter(ShutterAction::Stop),
        "go" => shutter(ShutterAction::SetPosition(percent(words.next())?)),
        "calibrate" => {
            let up = seconds(words.next())?;
            let down = seconds(words.next())?;
            shutter(ShutterAction::Calibrate { up, down })
        }
        "auto" => shutter(ShutterAction::AutoCalibrate),
        "dim" => dimmer(DimmerAction::SetLevel(percent(words.next())?)),
        "light" => match words.next() {
            Some("on") => dimmer(DimmerAction::SetStatus(true)),
            Some("off") => dimmer(DimmerAction::SetStatus(false)),
            _ => bail!("light on or light off?"),
        },
        "color" | "colour" => {
            let hex = words.next().ok_or_else(|| anyhow!("expected a colour"))?;
            dimmer(DimmerAction::SetColor(parse_color(hex)?))
        }
        "setpoint" => {
            let id = sensor(words.next())?;
            let value = celsius(words.next())?;
            Line::Send(Cmd::Heating {
                id,
                action: HeatingAction::SetPoint(value),
            })
        }
        "temp" => {
            let sensor = sensor(words.next())?;
            let value = celsius(words.next())?;
            Line::Send(Cmd::Temperature { sensor, value })
        }
        "heating" => {
            let on = match words.next() {
                Some("on") => true,
                Some("off") => false,
                _ => bail!("heating on or heating off?"),
            };
            heating(HeatingAction::Master(on))
        }
        "hysteresis" => {
            let value = celsius(words.next())?;
            let value = u16::try_from(value).map_err(|_| anyhow!("hysteresis can't be negative"))?;
            heating(HeatingAction::Hysteresis(value))
        }
        "status" => Line::Status,
        "wait" => {
            let Some(arg) = words.next() else {
                return Ok(Line::Settle);
            };
            let secs: f64 = arg.parse().with_context(|| format!("bad time {arg:?}"))?;
            if !(0.0..=86_400.0).contains(&secs) {
                bail!("can only wait between 0 and 86400 seconds");
            }
            Line::Wait {
                ms: (secs * 1000.0) as u32,
            }
        }
        "help" | "?" => Line::Help,
        "quit" | "exit" => Line::Quit,
        other => bail!("unknown command {other:?}, try help"),
    };
    if let Some(extra) = words.next() {
        bail!("unexpected {extra:?}");
    }
    Ok(line)
}
