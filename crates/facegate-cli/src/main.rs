use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{CaptureFrame, FrameDims, LightingCondition, LightingReport, QualityConfig};
use facegate_session::SessionConfig;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod setup;

#[derive(Parser)]
#[command(name = "facegate", version, about = "Face authentication toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download and verify the detection assets listed in a manifest
    Setup {
        /// Asset manifest (JSON) describing files, URLs and SHA-256 sums
        #[arg(long)]
        manifest: PathBuf,
        /// Target directory (default: $FACEGATE_MODEL_DIR or ~/.local/share/facegate/models)
        #[arg(long)]
        model_dir: Option<String>,
    },
    /// Inspect installed detection assets
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Report lighting and resolution suitability of a still frame
    Inspect {
        image: PathBuf,
    },
    /// Print the effective session configuration
    Config,
}

#[derive(Subcommand)]
enum ModelsAction {
    /// Check every installed asset against its manifest checksum
    Verify {
        #[arg(long)]
        model_dir: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct FrameReport {
    width: u32,
    height: u32,
    resolution_ok: bool,
    brightness: f32,
    lighting: LightingCondition,
    lighting_ok: bool,
}

fn assess_frame(frame: &CaptureFrame, quality: &QualityConfig) -> FrameReport {
    let FrameDims { width, height } = frame.dims();
    let lighting = LightingReport::measure(frame);
    FrameReport {
        width,
        height,
        resolution_ok: width >= quality.min_frame_width && height >= quality.min_frame_height,
        brightness: lighting.brightness,
        lighting: lighting.condition,
        lighting_ok: matches!(
            lighting.condition,
            LightingCondition::Dark | LightingCondition::Optimal | LightingCondition::Bright
        ),
    }
}

fn inspect(path: &Path) -> Result<()> {
    let image = image::open(path)
        .with_context(|| format!("failed to load {}", path.display()))?
        .to_rgb8();
    let frame = CaptureFrame::new(image);
    let report = assess_frame(&frame, &SessionConfig::from_env().quality);
    tracing::debug!(?report, "inspect");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Effective configuration as printed by `facegate config`. The descriptor
/// secret is redacted by its `Debug` impl.
fn render_config(config: &SessionConfig) -> String {
    format!("{config:#?}")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Setup {
            manifest,
            model_dir,
        } => setup::run(&manifest, model_dir),
        Command::Models {
            action: ModelsAction::Verify { model_dir },
        } => setup::verify(model_dir),
        Command::Inspect { image } => inspect(&image),
        Command::Config => {
            println!("{}", render_config(&SessionConfig::from_env()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_session::DescriptorSecret;
    use image::{Rgb, RgbImage};

    #[test]
    fn dim_small_frame_is_flagged() {
        let frame = CaptureFrame::new(RgbImage::from_pixel(320, 240, Rgb([20, 20, 20])));
        let report = assess_frame(&frame, &QualityConfig::default());
        assert!(!report.resolution_ok);
        assert_eq!(report.lighting, LightingCondition::TooDark);
        assert!(!report.lighting_ok);
    }

    #[test]
    fn vga_midtone_frame_passes() {
        let frame = CaptureFrame::new(RgbImage::from_pixel(640, 480, Rgb([128, 128, 128])));
        let report = assess_frame(&frame, &QualityConfig::default());
        assert!(report.resolution_ok);
        assert_eq!(report.lighting, LightingCondition::Optimal);
        assert!(report.lighting_ok);
    }

    #[test]
    fn config_dump_redacts_descriptor_secret() {
        let config = SessionConfig {
            descriptor_secret: DescriptorSecret::new("hunter2-descriptor-key"),
            ..SessionConfig::default()
        };
        let dump = render_config(&config);
        assert!(dump.contains("descriptor_secret: DescriptorSecret(***)"));
        assert!(!dump.contains("hunter2-descriptor-key"));
    }

    #[test]
    fn cli_parses_inspect() {
        let cli = Cli::try_parse_from(["facegate", "inspect", "frame.png"]).unwrap();
        assert!(matches!(cli.command, Command::Inspect { .. }));
    }

    #[test]
    fn cli_parses_setup() {
        let cli = Cli::try_parse_from(["facegate", "setup", "--manifest", "assets.json"]).unwrap();
        assert!(matches!(cli.command, Command::Setup { model_dir: None, .. }));
    }
}
