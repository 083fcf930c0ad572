use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceswap_core::{Device, EnhancerVariant};
use faceswap_engine::{spawn_engine, Config, DetectedFaces, EnhanceRequest, FaceSummary, Pipeline};
use faceswap_store::{write_png, OutputArchive};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "faceswap", about = "Detect, select and swap faces between two images")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// TOML config file (overrides FACESWAP_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing the ONNX models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Root of the output archive
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in both images and list them for selection
    Detect {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        target: PathBuf,
        /// Write every face crop into this directory
        #[arg(long)]
        crops: Option<PathBuf>,
        /// Write both images with numbered face boxes into this directory
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Swap one face of the source image with one face of the target image
    Swap {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        target: PathBuf,
        /// Index of the face to replace, as listed by `detect`
        #[arg(long)]
        source_face: usize,
        /// Index of the donor face, as listed by `detect`
        #[arg(long)]
        target_face: usize,
        /// Run the enhancement model on the result
        #[arg(long)]
        enhance: bool,
        /// Enhancer variant (e.g. realesrgan-4x); implies --enhance
        #[arg(long)]
        enhancer: Option<EnhancerVariant>,
        /// Enhancement device: cpu or cuda
        #[arg(long)]
        device: Option<Device>,
        /// Also write the result to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List recent results, most recent first
    History {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show model and storage status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Detect {
            source,
            target,
            crops,
            annotate,
        } => {
            let engine = spawn_engine(Pipeline::from_config(&config))?;
            engine.upload_images(source, target).await?;
            let faces = engine.detect_faces().await?;

            if let Some(dir) = crops {
                write_crops(&dir, "source", &faces.source)?;
                write_crops(&dir, "target", &faces.target)?;
            }
            if let Some(dir) = annotate {
                let annotated = engine.annotate_faces().await?;
                write_png(&dir.join("source_annotated.png"), &annotated.source)?;
                write_png(&dir.join("target_annotated.png"), &annotated.target)?;
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&faces)?);
            } else {
                print_faces(&faces);
            }
        }
        Commands::Swap {
            source,
            target,
            source_face,
            target_face,
            enhance,
            enhancer,
            device,
            output,
        } => {
            let enhancement = (enhance || enhancer.is_some()).then(|| EnhanceRequest {
                variant: enhancer.unwrap_or(config.enhancer),
                device: device.unwrap_or(config.device),
            });

            let engine = spawn_engine(Pipeline::from_config(&config))?;
            engine.upload_images(source, target).await?;
            engine.detect_faces().await?;
            let result = engine.swap(source_face, target_face, enhancement).await?;

            if let Some(path) = &output {
                write_png(path, result.image.pixels())?;
            }

            if cli.json {
                let report = serde_json::json!({
                    "session_id": result.session_id,
                    "source_face": result.source_index,
                    "target_face": result.target_index,
                    "width": result.image.width(),
                    "height": result.image.height(),
                    "enhancement": result.enhancement,
                    "archived": result.archived.as_ref().ok(),
                    "archive_error": result.archived.as_ref().err().map(ToString::to_string),
                    "output": output,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Swapped source face {} with target face {} ({}x{})",
                    result.source_index,
                    result.target_index,
                    result.image.width(),
                    result.image.height()
                );
                if let Some(request) = result.enhancement {
                    println!("  enhanced with {} on {}", request.variant, request.device);
                }
                match &result.archived {
                    Ok(entry) => println!("  saved {}", entry.result_path.display()),
                    Err(e) => eprintln!("  warning: {e}"),
                }
                if let Some(path) = &output {
                    println!("  written {}", path.display());
                }
            }

            if result.archived.is_err() && output.is_none() {
                anyhow::bail!("result could not be archived; rerun with --output to keep it");
            }
        }
        Commands::History { limit } => {
            let limit = limit.unwrap_or(config.history_limit);
            let entries = OutputArchive::new(&config.output_dir)
                .list_recent(limit)
                .context("failed to read history")?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No previous outputs");
            } else {
                for entry in &entries {
                    println!(
                        "{}  {}  ({})",
                        entry.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        entry.result_path.display(),
                        entry.download_name()
                    );
                }
            }
        }
        Commands::Status => {
            let engine = spawn_engine(Pipeline::from_config(&config))?;
            let status = engine.status().await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("detection:   {:?} ({})", status.detection.state, status.detection.path.display());
                println!("swap:        {:?} ({})", status.swap.state, status.swap.path.display());
                println!(
                    "enhance:     {} on {} (loaded on first use)",
                    status.default_enhancement.variant, status.default_enhancement.device
                );
                for enhancer in &status.enhancers {
                    println!(
                        "enhancer:    {:?} {} on {} ({})",
                        enhancer.slot.state,
                        enhancer.variant,
                        enhancer.device,
                        enhancer.slot.path.display()
                    );
                }
                println!("uploads:     {}", status.content_dir.display());
                println!("outputs:     {}", status.output_dir.display());
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
        None => Config::load()?,
    };
    if let Some(dir) = &cli.model_dir {
        config.model_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

fn write_crops(dir: &Path, side: &str, faces: &[FaceSummary]) -> Result<()> {
    for face in faces {
        let path = dir.join(format!("{side}_face_{}.png", face.index));
        write_png(&path, &face.crop)?;
    }
    Ok(())
}

fn print_faces(faces: &DetectedFaces) {
    for (side, list) in [("source", &faces.source), ("target", &faces.target)] {
        println!("{side}: {} face(s)", list.len());
        for face in list.iter() {
            let b = face.bbox;
            print!(
                "  [{}] ({}, {})-({}, {})  confidence {:.2}",
                face.index,
                b.x0(),
                b.y0(),
                b.x1(),
                b.y1(),
                face.confidence
            );
            if face.clamped {
                print!("  clamped");
            }
            println!();
        }
    }
}
