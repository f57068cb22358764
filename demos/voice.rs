use std::sync::Arc;

use clap::Parser;
use gemini_live::native::NativeAudio;
use gemini_live::types::audio::Voice;
use gemini_live::types::Setup;
use gemini_live::{
    session, utils, Config, GeminiConnector, LiveSnapshot, SessionController, SessionState, SharedSnapshot,
    ToolCallDispatcher,
};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Talk to the smart-fridge assistant through the default microphone and
/// speaker.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Print the available audio devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Input device name, defaults to the host's default.
    #[arg(long)]
    input: Option<String>,

    /// Output device name, defaults to the host's default.
    #[arg(long)]
    output: Option<String>,

    #[arg(long, default_value = "Zephyr")]
    voice: String,

    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Args::parse();

    if args.list_devices {
        println!("inputs:\n{}", utils::device::get_available_inputs()?);
        println!("outputs:\n{}", utils::device::get_available_outputs()?);
        return Ok(());
    }

    let mut devices = NativeAudio::new();
    if let Some(input) = args.input.as_deref() {
        devices = devices.with_input_device(input);
    }
    if let Some(output) = args.output.as_deref() {
        devices = devices.with_output_device(output);
    }

    let mut setup = Setup::new()
        .with_voice(args.voice.parse::<Voice>()?)
        .with_instructions(session::DEFAULT_INSTRUCTIONS)
        .with_tools(ToolCallDispatcher::tools());
    if let Some(model) = args.model.as_deref() {
        setup = setup.with_model(model);
    }

    let snapshot = SharedSnapshot::new(LiveSnapshot {
        steps: 6240,
        calories_burned: 412,
        inventory_item_names: vec![
            "Greek yogurt".to_string(),
            "Spinach".to_string(),
            "Eggs".to_string(),
            "Almond milk".to_string(),
        ],
    });

    let connector = Arc::new(GeminiConnector::new(Config::new()));
    let controller = SessionController::new(connector.clone(), Arc::new(devices), Arc::new(snapshot.clone()))
        .with_setup(setup.build());

    let handle = controller
        .open(|e| tracing::error!("session error: {}", e))
        .await?;
    tracing::info!("listening, press Ctrl-C to stop");

    // Pretend the user keeps walking while the session is open.
    let walker = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            ticker.tick().await;
            snapshot.update(|s| {
                s.steps += 15;
                s.calories_burned += 1;
            });
        }
    });

    let mut state = handle.subscribe();
    let watch_state = async {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            tracing::info!("session state: {:?}", current);
            if current.is_terminal() {
                break;
            }
        }
    };

    tokio::select! {
        _ = watch_state => {},
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
        }
    }

    walker.abort();
    handle.close().await;
    if handle.state() == SessionState::Failed {
        tracing::warn!("session ended with an error");
    }
    tracing::info!("stats: {:?}", connector.stats());
    Ok(())
}
