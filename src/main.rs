//! NeonLive - terminal host for the AI party session
//!
//! Connects to the Gemini Live API with the local microphone and screen,
//! plays the host's voice, runs the New Year countdown and keeps a banner
//! line fresh. Commands are read from stdin.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use neonlive::audio::{PulseDevices, PulseOutput};
use neonlive::banner::{refresh_loop, BannerClient};
use neonlive::config::{AppConfig, BANNER_REFRESH};
use neonlive::countdown::Countdown;
use neonlive::gemini_client::GeminiTransport;
use neonlive::{ConnectionState, LiveSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const APP_NAME: &str = "neonlive";
const MIDNIGHT_MESSAGE: &str = "It is midnight! Happy New Year! Congratulate us!";
/// Lead time of the `midnight` command.
const SIMULATED_MIDNIGHT_SECS: i64 = 5;

#[derive(Parser, Debug)]
#[command(name = "neonlive")]
#[command(about = "Live voice session with an AI New Year party host")]
struct Args {
    /// Start in celebration mode
    #[arg(long)]
    celebrate: bool,

    /// Pretend midnight is this many seconds away
    #[arg(long, value_name = "SECS")]
    midnight_in: Option<i64>,

    /// Do not stream video frames
    #[arg(long)]
    no_video: bool,

    /// Do not generate banner text
    #[arg(long)]
    no_banner: bool,

    /// Connect immediately on start
    #[arg(long)]
    connect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostCommand {
    Connect,
    Disconnect,
    Say(String),
    Mute,
    Unmute,
    MuteAi,
    UnmuteAi,
    Status,
    Midnight,
    Help,
    Quit,
}

impl HostCommand {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "connect" | "c" => Self::Connect,
            "disconnect" | "d" => Self::Disconnect,
            "say" if !rest.is_empty() => Self::Say(rest.to_string()),
            "mute" => Self::Mute,
            "unmute" => Self::Unmute,
            "mute-ai" => Self::MuteAi,
            "unmute-ai" => Self::UnmuteAi,
            "status" | "s" => Self::Status,
            "midnight" => Self::Midnight,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            _ => return None,
        };
        Some(command)
    }
}

const HELP: &str = "commands: connect, disconnect, say <text>, mute, unmute, mute-ai, unmute-ai, status, midnight, quit";

type HostSession = LiveSession<GeminiTransport, PulseDevices, PulseOutput>;

fn on_midnight(session: &mut HostSession, celebrate: &watch::Sender<bool>) {
    info!("Midnight reached");
    println!("*** HAPPY NEW YEAR! ***");
    celebrate.send_replace(true);

    if session.status() == ConnectionState::Connected {
        session.send_message(MIDNIGHT_MESSAGE);
    } else if let Err(e) = session.connect(true) {
        warn!("Could not start celebration session: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env();
    info!("Starting {} with model {}", APP_NAME, config.live_model);
    if !config.has_credential() {
        warn!("GEMINI_API_KEY is not set; connecting will fail");
    }

    let mut video = config.video_enabled && !args.no_video;
    if video && !cfg!(feature = "capture") {
        warn!("Built without the capture feature, video disabled");
        video = false;
    }

    let output = PulseOutput::open(APP_NAME).context("Failed to open audio output")?;
    let mut devices = PulseDevices::new(APP_NAME);
    if let Some(source) = &config.audio_source {
        devices = devices.with_source(source.clone());
    }
    let transport = GeminiTransport::new(&config.api_key);
    let mut session = LiveSession::new(
        config.api_key.clone(),
        config.live_config(),
        transport,
        devices,
        output,
    )
    .with_video(video);

    let (celebrate_tx, celebrate_rx) = watch::channel(args.celebrate);
    let (banner_tx, mut banner_rx) = mpsc::unbounded_channel();
    if !args.no_banner {
        let client = BannerClient::new(config.api_key.clone(), config.banner_model.clone());
        let generate = move |context: &'static str| {
            let client = client.clone();
            async move { client.generate(context).await }
        };
        tokio::spawn(refresh_loop(generate, celebrate_rx, BANNER_REFRESH, banner_tx));
    } else {
        drop(banner_tx);
    }

    let mut countdown = Countdown::new_year(&Local::now());
    if let Some(secs) = args.midnight_in {
        countdown.simulate_in(&Local::now(), secs);
    }
    println!("Countdown: {} to go", countdown.remaining(&Local::now()));
    println!("{}", HELP);

    let mut status_rx = session.watch_status();
    let mut speaking_rx = session.watch_speaking();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = interval(Duration::from_secs(1));

    if args.connect {
        if let Err(e) = session.connect(*celebrate_tx.borrow()) {
            error!("Connect failed: {}", e);
        }
    }

    loop {
        tokio::select! {
            Some(event) = session.next_event() => session.handle_event(event),
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let Some(command) = HostCommand::parse(&line) else {
                    println!("{}", HELP);
                    continue;
                };
                match command {
                    HostCommand::Connect => {
                        if let Err(e) = session.connect(*celebrate_tx.borrow()) {
                            println!("Connect failed: {}", e);
                        }
                    }
                    HostCommand::Disconnect => session.disconnect(),
                    HostCommand::Say(text) => session.send_message(&text),
                    HostCommand::Mute => session.set_mic_enabled(false),
                    HostCommand::Unmute => session.set_mic_enabled(true),
                    HostCommand::MuteAi => session.set_ai_muted(true),
                    HostCommand::UnmuteAi => session.set_ai_muted(false),
                    HostCommand::Status => println!(
                        "status: {} | speaking: {} | mic: {} | ai: {} | countdown: {}",
                        session.status(),
                        session.is_speaking(),
                        if session.is_mic_enabled() { "on" } else { "muted" },
                        if session.is_ai_muted() { "muted" } else { "on" },
                        countdown.remaining(&Local::now()),
                    ),
                    HostCommand::Midnight => {
                        countdown.simulate_in(&Local::now(), SIMULATED_MIDNIGHT_SECS);
                        println!("Midnight in {} seconds", SIMULATED_MIDNIGHT_SECS);
                    }
                    HostCommand::Help => println!("{}", HELP),
                    HostCommand::Quit => break,
                }
            }
            _ = tick.tick() => {
                if countdown.poll(&Local::now()) {
                    on_midnight(&mut session, &celebrate_tx);
                }
            }
            Some(text) = banner_rx.recv() => println!(">> {} <<", text),
            Ok(()) = status_rx.changed() => {
                println!("[{}]", *status_rx.borrow_and_update());
            }
            Ok(()) = speaking_rx.changed() => {
                if *speaking_rx.borrow_and_update() {
                    println!("[host is speaking]");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect();
    info!("{} stopped", APP_NAME);
    Ok(())
}
