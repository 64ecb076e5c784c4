use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser};

use svgconvert::{ConvertOptions, Input, Output, OutputFormat, convert};

#[derive(Debug, Parser)]
#[clap(name = "svgconvert", version, about = "Convert SVG drawings to PNG, PDF, PostScript or SVG")]
struct Cli {
    /// Input file, or `-` to read standard input
    input: Option<String>,

    /// Output format: png, pdf, ps or svg (default: from the output extension, else pdf)
    #[clap(short = 'f', long = "format")]
    format: Option<String>,

    /// Output file, or `-` for standard output
    #[clap(short = 'o', long = "output")]
    output: Option<String>,

    /// Resolution of raster output in pixels per inch
    #[clap(short = 'd', long = "dpi", default_value_t = 96.0)]
    dpi: f32,

    /// Scale factor applied to the drawing
    #[clap(short = 's', long = "scale", default_value_t = 1.0)]
    scale: f32,

    /// Background color painted under the drawing
    #[clap(short = 'b', long = "background")]
    background: Option<String>,

    /// Allow the document to read external files
    #[clap(short = 'u', long = "unsafe")]
    unsafe_resources: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let Some(input) = cli.input.as_deref() else {
        eprintln!("{}", Cli::command().render_usage());
        return ExitCode::from(2);
    };

    match run(&cli, input) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("svgconvert: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, input: &str) -> Result<()> {
    let output_path = cli.output.as_deref().filter(|o| *o != "-").map(PathBuf::from);
    let format = resolve_format(cli.format.as_deref(), output_path.as_deref())?;

    let mut options = ConvertOptions::new()
        .format(format)
        .dpi(cli.dpi)
        .scale(cli.scale)
        .unsafe_resources(cli.unsafe_resources);
    if let Some(raw) = cli.background.as_deref() {
        let (color, alpha) = svgconvert::style::parse_color(raw)
            .ok_or_else(|| anyhow!("invalid background color {raw:?}"))?;
        options = options.background(color, alpha);
    }

    let mut stdin_data = Vec::new();
    let source = if input == "-" {
        io::stdin()
            .lock()
            .read_to_end(&mut stdin_data)
            .context("reading standard input")?;
        Input::Bytes(&stdin_data)
    } else {
        Input::Location(input.to_string())
    };

    let described = if input == "-" { "<stdin>" } else { input };
    match output_path {
        Some(path) => {
            convert(source, Output::Path(path.clone()), &options)
                .with_context(|| format!("converting {described} to {}", path.display()))?;
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            convert(source, Output::Writer(&mut lock), &options)
                .with_context(|| format!("converting {described}"))?;
        }
    }
    Ok(())
}

/// `-f` wins, then the output extension, then PDF.
fn resolve_format(explicit: Option<&str>, output: Option<&Path>) -> Result<OutputFormat> {
    if let Some(name) = explicit {
        return Ok(name.parse()?);
    }
    Ok(output
        .and_then(OutputFormat::from_path)
        .unwrap_or(OutputFormat::Pdf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_precedence() {
        let png = Some(Path::new("out/result.png"));
        assert_eq!(resolve_format(None, None).unwrap(), OutputFormat::Pdf);
        assert_eq!(resolve_format(None, png).unwrap(), OutputFormat::Png);
        assert_eq!(resolve_format(None, Some(Path::new("result"))).unwrap(), OutputFormat::Pdf);
        assert_eq!(resolve_format(Some("Pdf"), png).unwrap(), OutputFormat::Pdf);
        assert!(resolve_format(Some("bmp"), None).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
        let cli = Cli::try_parse_from(["svgconvert", "-", "-f", "png", "-d", "150", "-u"]).unwrap();
        assert_eq!(cli.input.as_deref(), Some("-"));
        assert_eq!(cli.format.as_deref(), Some("png"));
        assert_eq!(cli.dpi, 150.0);
        assert!(cli.unsafe_resources);
    }
}
