//! vkpace demo viewer
//!
//! Clears an offscreen image on the compute queue and blits it to the
//! swapchain on the graphics queue, exercising a two-stage queue graph with
//! several frames in flight.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p vkpace-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--size <WxH>`: Initial window size (default: 1280x720)
//! - `--frames-in-flight <N>`: Frame slots (default: 2)
//! - `--fps <N>`: Frame rate cap, 0 for none (default: none)
//! - `--no-vsync`: Prefer mailbox/immediate presentation
//! - `--validation`: Force validation layers on
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use anyhow::{bail, Context};
use vkpace_app::{run_app, AppConfig};

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let config = parse_args(std::env::args().skip(1))?;
    run_app::<Viewer>(config)
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::new("vkpace viewer").with_size(WIDTH, HEIGHT);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--size" => {
                let value = args.next().context("--size needs a value like 1280x720")?;
                let (width, height) = parse_size(&value)?;
                config = config.with_size(width, height);
            }
            "--frames-in-flight" => {
                let value = args.next().context("--frames-in-flight needs a value")?;
                let frames: usize = value
                    .parse()
                    .with_context(|| format!("invalid frame count '{value}'"))?;
                if frames == 0 {
                    bail!("--frames-in-flight must be at least 1");
                }
                config = config.with_frames_in_flight(frames);
            }
            "--fps" => {
                let value = args.next().context("--fps needs a value")?;
                let fps: u32 = value
                    .parse()
                    .with_context(|| format!("invalid frame rate '{value}'"))?;
                config = config.with_target_fps(fps);
            }
            "--no-vsync" => config = config.with_vsync(false),
            "--vsync" => config = config.with_vsync(true),
            "--validation" => config = config.with_validation(true),
            other => bail!("unknown option '{other}' (see --help)"),
        }
    }

    Ok(config)
}

fn parse_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("size '{value}' is not WIDTHxHEIGHT"))?;
    let width = w.parse().with_context(|| format!("invalid width '{w}'"))?;
    let height = h.parse().with_context(|| format!("invalid height '{h}'"))?;
    Ok((width, height))
}

fn print_help() {
    eprintln!(
        "vkpace demo viewer

USAGE:
    cargo run -p vkpace-viewer -- [OPTIONS]

OPTIONS:
    --size <WxH>            Initial window size (default: {WIDTH}x{HEIGHT})
    --frames-in-flight <N>  Frame slots (default: 2)
    --fps <N>               Frame rate cap, 0 for none (default: none)
    --vsync                 Prefer FIFO presentation (default)
    --no-vsync              Prefer mailbox/immediate presentation
    --validation            Force validation layers on
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
