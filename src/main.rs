use anyhow::{Context, Result};
use evse_engine::clock::{Clock, SystemClock};
use evse_engine::evse::State;
use evse_engine::logging::init_logging;
use evse_engine::runtime::{EvseHandle, EvseRuntime, HardwareInput};
use evse_engine::script::{ScriptCommand, parse_line};
use evse_engine::{Config, evse::FaultState};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

const USAGE: &str = "usage: evse-sim [--config <path>] [--schema] [script]";

struct Args {
    config: Option<String>,
    script: Option<String>,
}

#[cfg(feature = "schema")]
fn print_schema() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&Config::json_schema()?)?);
    Ok(())
}

#[cfg(not(feature = "schema"))]
fn print_schema() -> Result<()> {
    anyhow::bail!("built without the `schema` feature")
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        script: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--config" || arg == "-c" {
            args.config = Some(iter.next().context(USAGE)?);
        } else if arg == "--schema" {
            print_schema()?;
            std::process::exit(0);
        } else if arg == "--help" || arg == "-h" {
            println!("{}", USAGE);
            std::process::exit(0);
        } else if args.script.is_none() {
            args.script = Some(arg);
        } else {
            anyhow::bail!(USAGE);
        }
    }
    Ok(args)
}

async fn execute(handle: &EvseHandle, clock: &dyn Clock, command: ScriptCommand) -> Result<()> {
    match command {
        ScriptCommand::Plug | ScriptCommand::NoDemand => {
            handle.set_state(State::PluggedInNoDemand).await?
        }
        ScriptCommand::Demand => handle.set_state(State::PluggedInDemand).await?,
        ScriptCommand::Unplug => handle.set_state(State::NotPluggedIn).await?,
        ScriptCommand::EnableCharging {
            until,
            minimum,
            maximum,
        } => {
            let until = until.resolve(clock.now_epoch_seconds().ok())?;
            handle.enable_charging(until, minimum, maximum).await?
        }
        ScriptCommand::EnableDischarging { until, maximum } => {
            let until = until.resolve(clock.now_epoch_seconds().ok())?;
            handle.enable_discharging(until, maximum).await?
        }
        ScriptCommand::Disable => handle.disable().await?,
        ScriptCommand::Fault(fault) => handle.set_fault(fault).await?,
        ScriptCommand::ClearFault => handle.set_fault(FaultState::NoError).await?,
        ScriptCommand::Diagnostics => handle.start_diagnostics().await?,
        ScriptCommand::DiagnosticsComplete => {
            handle.hardware(HardwareInput::DiagnosticsComplete).await?
        }
        ScriptCommand::Meter { meter, value } => {
            handle.set_meter(meter, value)?;
            handle.hardware(HardwareInput::RefreshSession).await?
        }
        ScriptCommand::Sleep(secs) => tokio::time::sleep(Duration::from_secs_f64(secs)).await,
        ScriptCommand::Status => {
            println!("{}", serde_json::to_string(&*handle.snapshot())?);
        }
    }
    Ok(())
}

async fn replay<R: AsyncBufRead + Unpin>(
    handle: &EvseHandle,
    clock: &dyn Clock,
    reader: R,
) -> Result<()> {
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => anyhow::bail!("line {}: {}", line_no, e),
        };
        // Rejected commands are part of the simulation, not fatal
        if let Err(e) = execute(handle, clock, command).await {
            warn!("line {}: {}", line_no, e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path))?,
        None => Config::load()?,
    };
    init_logging(&config.logging)?;

    let clock = Arc::new(SystemClock);
    let runtime = EvseRuntime::new(&config, clock.clone())
        .map_err(|e| anyhow::anyhow!("Failed to create EVSE runtime: {}", e))?;
    let handle = runtime.handle();

    info!("EVSE simulator starting on endpoint {}", config.endpoint);

    let mut updates = handle.updates();
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.next().await {
            match update {
                Ok(update) => match serde_json::to_string(&update) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!("Failed to encode update: {}", e),
                },
                Err(e) => warn!("Update stream lagged: {}", e),
            }
        }
    });

    let engine = tokio::spawn(runtime.run());

    let replayed = match &args.script {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening script {}", path))?;
            replay(&handle, clock.as_ref(), BufReader::new(file)).await
        }
        None => replay(&handle, clock.as_ref(), BufReader::new(tokio::io::stdin())).await,
    };

    handle.shutdown()?;
    drop(handle);
    engine.await??;
    printer.await?;

    match replayed {
        Ok(()) => {
            info!("Simulation complete");
            Ok(())
        }
        Err(e) => {
            error!("Simulation failed: {}", e);
            Err(e)
        }
    }
}
