// ============================================================================
// Rasterly CLI — headless batch processing via command-line arguments
// ============================================================================
//
// Usage examples:
//   rasterly --input photo.png --output flat.jpg --quality 85
//   rasterly -i project.rly -o out.png              (format inferred from ext)
//   rasterly -i "*.jpg" --output-dir converted/ --format png
//   rasterly -i project.rly --info
//
// All processing runs synchronously on the current thread; the only
// parallelism is inside the compositor.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::io::{self, SaveFormat, TiffCompression};
use crate::project::Project;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Rasterly headless image processor.
///
/// Convert between formats and flatten layered projects — no GUI required.
#[derive(Parser, Debug)]
#[command(
    name = "rasterly",
    about = "Rasterly headless batch image processor",
    long_about = "Convert image files and flatten layered projects without a GUI.\n\
                  Supports PNG, JPEG, BMP, TGA, TIFF, and RLY project files.\n\n\
                  Example:\n  \
                  rasterly --input photo.png --output result.jpg --quality 85\n  \
                  rasterly -i \"*.png\" --output-dir out/ --format tiff"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    /// RLY project files retain all layers; all other formats load as one layer.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    /// For batch input use --output-dir instead.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    /// Files are written here with the original stem and the target format's extension.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, bmp, tga, tiff, rly.
    /// When omitted, the format is inferred from --output's extension, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100, default 90).
    #[arg(short, long, default_value_t = 90, value_name = "1-100")]
    pub quality: u8,

    /// TIFF compression mode: none, lzw, deflate (default: none).
    #[arg(long, default_value = "none", value_name = "MODE")]
    pub tiff_compression: String,

    /// Print document information (dimensions, layer stack) for each input.
    #[arg(long)]
    pub info: bool,

    /// Print per-file timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    // Resolve glob patterns / literal paths → concrete PathBufs
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    // Multiple inputs require --output-dir, not --output
    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if !args.info && args.output.is_none() && args.output_dir.is_none() {
        eprintln!("error: nothing to do — pass --output, --output-dir, or --info.");
        return ExitCode::FAILURE;
    }

    let format = parse_format(args.format.as_deref(), args.output.as_deref());
    let tiff_compression = match args.tiff_compression.to_lowercase().as_str() {
        "lzw" => TiffCompression::Lzw,
        "deflate" => TiffCompression::Deflate,
        _ => TiffCompression::None,
    };

    // Create output directory if specified
    if let Some(dir) = &args.output_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "error: could not create output directory '{}': {}",
                dir.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    }

    let mut failures = 0usize;
    for input in &inputs {
        let started = Instant::now();
        match process_file(input, &args, format, tiff_compression) {
            Ok(()) => {
                if args.verbose {
                    println!("{}: done in {} ms", input.display(), started.elapsed().as_millis());
                }
            }
            Err(e) => {
                eprintln!("{}: {}", input.display(), e);
                crate::log_err!("CLI: {} failed: {}", input.display(), e);
                failures += 1;
            }
        }
    }

    if args.verbose {
        println!("{} file(s) processed, {} failed", inputs.len(), failures);
    }
    if failures > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn process_file(
    input: &Path,
    args: &CliArgs,
    format: SaveFormat,
    tiff_compression: TiffCompression,
) -> Result<(), String> {
    let project = Project::from_file(input.to_path_buf()).map_err(|e| e.to_string())?;

    if args.info {
        print_info(input, &project);
    }

    let Some(out) = output_path_for(input, args.output.as_deref(), args.output_dir.as_deref(), format)
    else {
        return Ok(()); // info-only run
    };

    io::export(&project.canvas, &out, format, args.quality, tiff_compression)
        .map_err(|e| e.to_string())?;
    crate::log_info!("CLI: {} → {}", input.display(), out.display());
    Ok(())
}

fn print_info(path: &Path, project: &Project) {
    let canvas = &project.canvas;
    println!("{}", path.display());
    println!("  canvas: {}×{} px", canvas.width(), canvas.height());
    println!("  layers: {}", canvas.layer_count());
    for (i, info) in project.layer_panel().iter().enumerate() {
        println!(
            "    [{}] {:<24} {}  opacity {:>3.0}%  {}  offset ({}, {}){}",
            i,
            info.name,
            if info.visible { "visible" } else { "hidden " },
            info.opacity * 100.0,
            info.blend_mode.name(),
            info.offset.x,
            info.offset.y,
            if info.is_active { "  (active)" } else { "" },
        );
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns; literal paths pass through when the pattern
/// matches nothing (globs with special characters in the name, etc.).
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for pattern in patterns {
        let mut matched = false;
        if let Ok(paths) = glob::glob(pattern) {
            for entry in paths.flatten() {
                if entry.is_file() {
                    files.push(entry);
                    matched = true;
                }
            }
        }
        if !matched {
            let literal = PathBuf::from(pattern);
            if literal.is_file() {
                files.push(literal);
            }
        }
    }
    files
}

/// Explicit --format wins, then the --output extension, then PNG.
fn parse_format(flag: Option<&str>, output: Option<&Path>) -> SaveFormat {
    if let Some(f) = flag {
        if let Some(fmt) = SaveFormat::from_extension(f) {
            return fmt;
        }
        eprintln!("warning: unknown format '{}', defaulting to png", f);
    }
    if let Some(out) = output
        && let Some(ext) = out.extension().and_then(|e| e.to_str())
        && let Some(fmt) = SaveFormat::from_extension(ext)
    {
        return fmt;
    }
    SaveFormat::Png
}

/// Where one input's output lands. `None` when no output was requested.
fn output_path_for(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: SaveFormat,
) -> Option<PathBuf> {
    if let Some(dir) = output_dir {
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
        return Some(dir.join(format!("{}.{}", stem, format.extension())));
    }
    output.map(|p| p.to_path_buf())
}
