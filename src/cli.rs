// ============================================================================
// characanvas CLI - headless batch processing via command-line arguments
// ============================================================================
//
// Usage examples:
//   characanvas --input chara.json --output flat.png
//   characanvas -i chara.json -o flat.jpg --hide "Sketch"
//   characanvas -i "shots/*.png" --output-dir out/ --format png
//   characanvas -i chara.json --info
//
// No GUI exists; all processing runs synchronously on the current thread.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::LayerPatch;
use crate::io::{export_composite, load_image_as_canvas, load_project_file};
use crate::{log_err, log_info};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// characanvas headless project processor.
///
/// Flatten saved drawing-studio projects (or plain images) to PNG/JPEG
/// without opening any UI.
#[derive(Parser, Debug)]
#[command(
    name = "characanvas",
    about = "characanvas headless project flattener",
    long_about = "Flatten saved drawing-studio project files to PNG or JPEG without a UI.\n\
                  Project files keep all layers; plain raster inputs load as one layer.\n\n\
                  Example:\n  \
                  characanvas --input chara.json --output flat.png\n  \
                  characanvas -i \"projects/*.json\" --output-dir out/ --format png"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "projects/*.json").
    /// Project JSON keeps all layers; PNG/JPEG inputs load as one layer.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    /// For batch input use --output-dir instead.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing. Files are written with the
    /// original stem and the target format's extension.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format for --output-dir mode: png or jpg. Default png.
    #[arg(long, default_value = "png")]
    pub format: String,

    /// Hide the named layer before flattening. Repeatable.
    #[arg(long, value_name = "LAYER")]
    pub hide: Vec<String>,

    /// Print layer info for each input instead of exporting.
    #[arg(long)]
    pub info: bool,
}

// ============================================================================
// Entry point
// ============================================================================

pub fn run(args: CliArgs) -> ExitCode {
    let started = Instant::now();

    let inputs = expand_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched");
        return ExitCode::FAILURE;
    }
    if args.output.is_some() && inputs.len() > 1 {
        eprintln!("error: --output is only valid for a single input; use --output-dir");
        return ExitCode::FAILURE;
    }
    if !args.info && args.output.is_none() && args.output_dir.is_none() {
        eprintln!("error: nothing to do; pass --output, --output-dir or --info");
        return ExitCode::FAILURE;
    }

    let mut failures = 0usize;
    for input in &inputs {
        if let Err(e) = process_one(input, &args) {
            eprintln!("error: {}: {}", input.display(), e);
            log_err!("CLI processing failed for {}: {}", input.display(), e);
            failures += 1;
        }
    }

    log_info!(
        "CLI run finished: {} file(s), {} failure(s), {:.2?}",
        inputs.len(),
        failures,
        started.elapsed()
    );
    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn process_one(input: &Path, args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let is_project = input
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let mut canvas = if is_project {
        load_project_file(input)?.canvas
    } else {
        load_image_as_canvas(input)?
    };

    for name in &args.hide {
        let Some(id) = canvas.layers.iter().find(|l| &l.name == name).map(|l| l.id) else {
            eprintln!("warning: no layer named \"{}\" in {}", name, input.display());
            continue;
        };
        canvas.update_layer(
            id,
            LayerPatch {
                visible: Some(false),
                ..Default::default()
            },
        )?;
    }

    if args.info {
        println!("{} ({}x{})", input.display(), canvas.width, canvas.height);
        for (i, layer) in canvas.layers.iter().enumerate().rev() {
            println!(
                "  [{}] {:24} {} opacity {:3}% {}{}",
                i,
                layer.name,
                layer.blend_mode.name(),
                layer.opacity,
                if layer.visible { "visible" } else { "hidden" },
                if layer.locked { ", locked" } else { "" },
            );
        }
        return Ok(());
    }

    let out_path = match (&args.output, &args.output_dir) {
        (Some(path), _) => path.clone(),
        (None, Some(dir)) => {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string());
            dir.join(format!("{}.{}", stem, normalize_format(&args.format)?))
        }
        (None, None) => unreachable!("validated in run()"),
    };

    if let Some(parent) = out_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    export_composite(&canvas, &out_path)?;
    println!("{} -> {}", input.display(), out_path.display());
    Ok(())
}

fn normalize_format(format: &str) -> Result<&'static str, Box<dyn std::error::Error>> {
    match format.to_ascii_lowercase().as_str() {
        "png" => Ok("png"),
        "jpg" | "jpeg" => Ok("jpg"),
        other => Err(format!("unsupported --format \"{}\" (png, jpg)", other).into()),
    }
}

/// Expand glob patterns; non-glob paths pass through untouched so missing
/// files still produce a per-file error later.
fn expand_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for pattern in patterns {
        if pattern.contains(&['*', '?', '['][..]) {
            match glob::glob(pattern) {
                Ok(paths) => {
                    for path in paths.flatten() {
                        out.push(path);
                    }
                }
                Err(e) => eprintln!("warning: bad glob pattern \"{}\": {}", pattern, e),
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }
    out
}
