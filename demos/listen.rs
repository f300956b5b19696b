use std::error::Error;
use std::process::ExitCode;

use oryx_link::{KeyboardConfig, Preset};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let config = match args.next().as_deref() {
        None => Preset::ErgodoxEz.config(),
        Some("--config") => {
            let Some(path) = args.next() else {
                print_usage();
                return Ok(());
            };
            KeyboardConfig::from_toml_str(&std::fs::read_to_string(path)?)?
        }
        Some(name) => match name.parse::<Preset>() {
            Ok(preset) => preset.config(),
            Err(_) => {
                print_usage();
                return Ok(());
            }
        },
    };

    listen(config).await
}

#[cfg(feature = "usb")]
async fn listen(config: KeyboardConfig) -> Result<(), Box<dyn Error>> {
    use oryx_link::Event;
    use tokio::sync::broadcast::error::RecvError;

    println!("Press the pairing key on the keyboard to pair.");
    let keyboard = oryx_link::Keyboard::connect_usb(config).await?;
    let mut events = keyboard.subscribe();
    println!("Paired. Layer: {}", keyboard.current_layer());

    loop {
        match events.recv().await {
            Ok(Event::KeyDown { col, row, index }) => println!("down  #{index} ({col}, {row})"),
            Ok(Event::KeyUp { col, row, index }) => println!("up    #{index} ({col}, {row})"),
            Ok(Event::LayerChanged { layer }) => println!("layer {layer}"),
            Ok(Event::Disconnected { reason }) => {
                println!("Disconnected: {reason}");
                return Ok(());
            }
            Ok(other) => println!("{other:?}"),
            Err(RecvError::Lagged(skipped)) => println!("skipped {skipped} events"),
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

#[cfg(not(feature = "usb"))]
async fn listen(_config: KeyboardConfig) -> Result<(), Box<dyn Error>> {
    Err("built without `usb` feature".into())
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run --example listen [ergodox-ez]");
    eprintln!("  cargo run --example listen --config <keyboard.toml>");
}
