use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cnclink::{
    init_logging, list_ports, Axis, ControllerConfig, JobDescriptor, JobPhase, MarlinController,
    SimulatedFirmware, SimulatedOpener, SimulatorOptions, BUILD_DATE, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cnclink", version, about = "Drive a Marlin CNC machine over serial")]
struct Args {
    /// Controller config (TOML or JSON); defaults to the user config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Talk to a simulated board instead of a serial port
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports that look like CNC controllers
    Ports,
    /// Stream a G-code file
    Run {
        file: PathBuf,
        /// Copy the program to the SD card and run it from there
        #[arg(long)]
        sd: bool,
    },
    /// Home one axis, or all axes when none is given
    Home { axis: Option<Axis> },
    /// Relative move on one axis
    Jog {
        axis: Axis,
        #[arg(allow_negative_numbers = true)]
        distance: f64,
        #[arg(short, long, default_value_t = 1000.0)]
        feed: f64,
    },
    /// Send one command and print the board's answer
    Send {
        command: String,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::load_or_default(&ControllerConfig::default_path()?)?,
    };
    Ok(config)
}

async fn connect(controller: &MarlinController, simulate: bool) -> Result<()> {
    if simulate {
        let board = Arc::new(SimulatedFirmware::new(
            SimulatorOptions::default().with_ack_delay(Duration::from_millis(20)),
        ));
        let opener = SimulatedOpener::new().with_board(board);
        controller.connect(&opener).await?;
    } else {
        controller.connect_serial().await?;
    }
    tracing::info!(
        "Connected on {}",
        controller.endpoint().unwrap_or_default()
    );
    Ok(())
}

async fn run_job(controller: &MarlinController, file: &PathBuf, sd: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let source = file.file_name().map(|n| n.to_string_lossy().into_owned());
    let job = JobDescriptor::from_text(&text, source);
    let commands = job.commands.clone();

    if !controller.load_job(job) {
        bail!("controller is busy, cannot load {}", file.display());
    }
    let started = if sd {
        controller.start_job_on_sd_card(commands).await
    } else {
        controller.start_job(commands)
    };
    if !started {
        bail!("job did not start");
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut last_percent = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, stopping job");
                if sd {
                    controller.sd_stop()?;
                } else {
                    controller.stop_job().await;
                }
                break;
            }
            _ = ticker.tick() => {
                if sd {
                    controller.sd_progress().await;
                }
                let snapshot = controller.snapshot();
                let percent = (snapshot.job_progress * 100.0).round() as u32;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    println!("{:>3}%  {}", percent, snapshot.status_text);
                }
                let finished = if sd {
                    snapshot.job_progress >= 1.0
                } else {
                    controller.job_phase().is_terminal() && !controller.is_job_active()
                };
                if finished {
                    break;
                }
            }
        }
    }

    let snapshot = controller.snapshot();
    println!("{}", snapshot.status_text);
    if controller.job_phase() == JobPhase::Error {
        bail!("job failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;
    tracing::debug!("cnclink {} (built {})", VERSION, BUILD_DATE);

    if let Command::Ports = args.command {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let config = load_config(args.config.as_ref())?;
    let controller = MarlinController::new(config);
    connect(&controller, args.simulate).await?;

    let result = match &args.command {
        Command::Ports => Ok(()),
        Command::Run { file, sd } => run_job(&controller, file, *sd).await,
        Command::Home { axis: Some(axis) } => controller.home_axis(*axis).await.map_err(Into::into),
        Command::Home { axis: None } => controller.home_all().await.map_err(Into::into),
        Command::Jog {
            axis,
            distance,
            feed,
        } => controller.jog(*axis, *distance, *feed).map_err(Into::into),
        Command::Send {
            command,
            timeout_ms,
        } => {
            let answer = controller
                .send_command_with_response(command, Duration::from_millis(*timeout_ms))
                .await;
            println!("{}", answer);
            Ok(())
        }
    };

    if !matches!(args.command, Command::Send { .. } | Command::Run { .. }) {
        // Give the position refresh a moment to arrive
        tokio::time::sleep(Duration::from_millis(250)).await;
        let position = controller.state().position();
        println!(
            "X:{:.3} Y:{:.3} Z:{:.3} A:{:.3}",
            position.x, position.y, position.z, position.a
        );
    }

    controller.disconnect().await;
    result
}
