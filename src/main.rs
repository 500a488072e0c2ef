mod config;
mod error;
mod event;
mod general;
mod io;
mod net;
mod relay;
mod remote;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::general::cancel::CancelToken;
use crate::general::check::{print_degraded_output, print_session_active, print_session_closed, print_session_failed};
use crate::general::stdin_handler::spawn_stdin_handler;
use crate::general::transpose::{Identity, PitchShift, ShiftControl, Transform};
use crate::io::midi::{MidiBackend, MidiSink};
use crate::io::select::{select_ports, InputChoice, PortPreferences, PortSelection, StdinChooser};
use crate::net::connection::{Connection, TcpConnection};
use crate::relay::{RelayEngine, TransformDirection};
use crate::remote::osc_listener::spawn_osc_listener;

#[derive(Parser, Debug, Default)]
#[clap(author, version, about = "Relay MIDI between a local device and one network peer", long_about = None)]
struct Args {
    /// [PORT] [HOST]: input port index and/or remote host. Without a host
    /// (and without --listen) input is echoed to the local output.
    #[clap(value_name = "PORT|HOST", num_args = 0..=2)]
    targets: Vec<String>,

    /// TCP port of the peer, or to listen on
    #[clap(short = 'p', long)]
    remote_port: Option<u16>,

    /// Wait for one peer to connect instead of connecting out
    #[clap(short = 'l', long)]
    listen: bool,

    /// Output port index
    #[clap(short = 'o', long)]
    output_port: Option<usize>,

    /// Open a virtual input port instead of a device
    #[clap(long = "virtual")]
    virtual_input: bool,

    /// Initial pitch shift in semitones
    #[clap(short = 's', long, allow_negative_numbers = true)]
    shift: Option<i32>,

    /// Idle delay between polls when nothing is pending, in milliseconds
    #[clap(long)]
    idle_ms: Option<u64>,

    /// JSON config file (defaults to relay.json if present)
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log every relayed event
    #[clap(short = 'v', long)]
    verbose: bool,
}

/// Split `[PORT] [HOST]`: a leading number is the port index, anything else a host.
fn split_targets(targets: &[String]) -> Result<(Option<usize>, Option<String>), String> {
    match targets {
        [] => Ok((None, None)),
        [only] => match only.parse::<usize>() {
            Ok(port) => Ok((Some(port), None)),
            Err(_) => Ok((None, Some(only.clone()))),
        },
        [port, host] => match port.parse::<usize>() {
            Ok(port) => Ok((Some(port), Some(host.clone()))),
            Err(_) => Err(format!("'{}' is not a port index", port)),
        },
        _ => Err("expected at most a port index and a host".to_string()),
    }
}

/// Command line options win over the config file.
fn apply_args(config: &mut RelayConfig, args: &Args, host: Option<String>) {
    if host.is_some() {
        config.network.remote_host = host;
    }
    if let Some(port) = args.remote_port {
        config.network.remote_port = port;
    }
    if args.listen {
        config.network.listen = true;
    }
    if args.virtual_input {
        config.midi.virtual_input = true;
    }
    if let Some(shift) = args.shift {
        config.transpose.initial = shift;
    }
    if let Some(ms) = args.idle_ms {
        config.relay.idle_delay_ms = ms;
    }
}

fn init_logging(verbose: bool) {
    let from_env = std::env::var_os("RUST_LOG").is_some();
    // Filter at debug so `debug on` can raise the level at runtime
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .format_timestamp_millis()
        .init();
    if !from_env {
        log::set_max_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
    }
}

fn describe_route(selection: &PortSelection, inputs: &[String], outputs: &[String], virtual_name: &str, peer: Option<&str>) -> String {
    let input = match selection.input {
        InputChoice::Virtual => format!("virtual '{}'", virtual_name),
        InputChoice::Index(idx) => format!("'{}'", inputs[idx]),
    };
    let output = match selection.output {
        Some(idx) => format!("'{}'", outputs[idx]),
        None => "no output".to_string(),
    };
    match peer {
        Some(peer) => format!("{} -> {} -> {}", input, peer, output),
        None => format!("{} -> {} (local echo)", input, output),
    }
}

fn run(args: Args, input_index: Option<usize>, host: Option<String>) -> anyhow::Result<()> {
    let mut config = RelayConfig::load(args.config.as_deref())?;
    apply_args(&mut config, &args, host);

    let backend = MidiBackend::new(&config.midi.client_name)?;
    let prefs = PortPreferences {
        virtual_input: config.midi.virtual_input,
        input_index,
        output_index: args.output_port,
        input_match: config.midi.input_match.clone(),
        output_match: config.midi.output_match.clone(),
    };
    let selection = select_ports(backend.input_names(), backend.output_names(), &prefs, &mut StdinChooser)?;

    // Installed after the prompts so Ctrl-C still aborts an unanswered prompt
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupt received, stopping");
        on_interrupt.cancel();
    })
    .context("installing the interrupt handler")?;

    let network = &config.network;
    let link = match (&network.remote_host, network.listen) {
        (Some(host), listen) => {
            if listen {
                log::warn!("Both a remote host and --listen given, connecting to {}", host);
            }
            Some(TcpConnection::connect(host, network.remote_port, config.connect_timeout(), config.stream_timeouts())?)
        }
        (None, true) => {
            match TcpConnection::accept_one(&network.bind_host, network.remote_port, config.stream_timeouts(), &cancel)? {
                Some(conn) => Some(conn),
                None => {
                    log::info!("Cancelled before a peer connected");
                    return Ok(());
                }
            }
        }
        (None, false) => None,
    };

    let route = describe_route(
        &selection,
        backend.input_names(),
        backend.output_names(),
        &config.midi.virtual_port_name,
        link.as_ref().map(|conn| conn.peer()),
    );
    let (source, sink) = backend.open(&selection, &config.midi.virtual_port_name)?;
    if sink.is_none() {
        print_degraded_output();
    }

    let shift = ShiftControl::new(config.transpose.initial, config.transpose.min, config.transpose.max);
    if shift.get() != 0 {
        log::info!("Pitch shift {} semitones ({:?})", shift.get(), config.relay.direction);
    }
    spawn_stdin_handler(shift.clone(), cancel.clone());
    let osc_handle = if config.osc.enabled {
        match spawn_osc_listener(config.osc.clone(), shift.clone(), cancel.clone()) {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::warn!("OSC control disabled: {}", err);
                None
            }
        }
    } else {
        None
    };

    let transform: Box<dyn Transform> = match config.relay.direction {
        TransformDirection::None => Box::new(Identity),
        _ => Box::new(PitchShift::new(shift, config.transpose.notes_only)),
    };

    print_session_active(&route);
    let engine = RelayEngine::new(
        Box::new(source),
        sink.map(|s| Box::new(s) as Box<dyn MidiSink>),
        link.map(|conn| Box::new(conn) as Box<dyn Connection>),
        transform,
        config.relay_options(),
        cancel.clone(),
    );
    let result = engine.run();

    // Stop the helper threads; the console thread may be stuck in a read and is left behind
    cancel.cancel();
    if let Some(handle) = osc_handle {
        let _ = handle.join();
    }

    let stats = result?;
    print_session_closed(&stats);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let (input_index, host) = match split_targets(&args.targets) {
        Ok(split) => split,
        Err(msg) => Args::command()
            .error(clap::error::ErrorKind::InvalidValue, msg)
            .exit(),
    };
    init_logging(args.verbose);

    match run(args, input_index, host) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::debug!("{:?}", err);
            print_session_failed(&format!("{:#}", err));
            let code = err.downcast_ref::<RelayError>().map(RelayError::exit_code).unwrap_or(2);
            ExitCode::from(code)
        }
    }
}
