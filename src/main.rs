use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tracing::info;

use hdr_recon_rs::image_pipeline::response::{
    DEFAULT_DEBEVEC_SAMPLES, DEFAULT_DEBEVEC_SMOOTHNESS, DEFAULT_GAMMA, read_response,
    write_response,
};
use hdr_recon_rs::image_pipeline::{
    HdrPipeline, InverseCrf, MergeDomain, MitsunagaNayarParams, PipelineConfig, ResponseStrategy,
    TiffCompression, WeightScheme,
};
use hdr_recon_rs::logger;

const DEFAULT_ROBERTSON_ITERATIONS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ResponseKind {
    Debevec,
    Robertson,
    Mitsunaga,
    Linear,
    Gamma,
}

/// One input file with its exposure time, given as `PATH:SECONDS`.
#[derive(Debug, Clone)]
struct ExposureArg {
    path: PathBuf,
    exposure: f32,
}

fn parse_exposure_arg(value: &str) -> Result<ExposureArg, String> {
    let (path, time) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected PATH:SECONDS, got '{}'", value))?;
    if path.is_empty() {
        return Err(format!("missing path in '{}'", value));
    }
    let exposure = parse_seconds(time)?;
    Ok(ExposureArg {
        path: PathBuf::from(path),
        exposure,
    })
}

/// Accepts decimal seconds (`0.25`) or shutter fractions (`1/60`).
fn parse_seconds(text: &str) -> Result<f32, String> {
    let value = match text.split_once('/') {
        Some((num, den)) => {
            let num: f32 = num.trim().parse().map_err(|_| format!("bad exposure '{}'", text))?;
            let den: f32 = den.trim().parse().map_err(|_| format!("bad exposure '{}'", text))?;
            num / den
        }
        None => text.trim().parse().map_err(|_| format!("bad exposure '{}'", text))?,
    };
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("exposure must be positive, got '{}'", text))
    }
}

#[derive(Parser, Debug)]
#[command(name = "hdr_recon")]
#[command(about = "Merge a bracketed exposure stack into a 32-bit float radiance TIFF")]
struct Cli {
    /// Input exposures as PATH:SECONDS, e.g. `img_0.jpg:1/60`
    #[arg(required = true, num_args = 1.., value_parser = parse_exposure_arg)]
    inputs: Vec<ExposureArg>,
    #[arg(short, long, default_value = "radiance.tiff")]
    output: PathBuf,
    /// uniform, identity, reverse, hat, debevec, debevec-tight or robertson
    #[arg(long, default_value = "debevec")]
    weight: WeightScheme,
    /// linear or log
    #[arg(long, default_value = "log")]
    domain: MergeDomain,
    #[arg(long, value_enum, default_value_t = ResponseKind::Debevec)]
    response: ResponseKind,
    /// Samples drawn for response fitting
    #[arg(long)]
    samples: Option<usize>,
    /// Debevec–Malik smoothness weight
    #[arg(long, default_value_t = DEFAULT_DEBEVEC_SMOOTHNESS)]
    smoothness: f32,
    /// Iteration cap for Robertson and Mitsunaga–Nayar
    #[arg(long)]
    iterations: Option<usize>,
    /// Mitsunaga–Nayar polynomial degree; negative searches 1..=|degree|
    #[arg(long, default_value_t = -6, allow_negative_numbers = true)]
    degree: i32,
    /// Mitsunaga–Nayar: constrain every exposure pair, not just neighbours
    #[arg(long)]
    full: bool,
    /// Register exposures before merging
    #[arg(long)]
    align: bool,
    /// Use a response saved with --save-response instead of fitting one
    #[arg(long, conflicts_with = "response")]
    load_response: Option<PathBuf>,
    #[arg(long)]
    save_response: Option<PathBuf>,
    /// none, lzw, deflate-fast, deflate or deflate-best
    #[arg(long, default_value = "none")]
    compression: TiffCompression,
    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn response_strategy(&self) -> Result<ResponseStrategy> {
        if let Some(path) = &self.load_response {
            let curve = read_response(path)
                .with_context(|| format!("loading response from {}", path.display()))?;
            return Ok(ResponseStrategy::Fixed(curve));
        }

        Ok(match self.response {
            ResponseKind::Debevec => ResponseStrategy::DebevecMalik {
                samples: self.samples.unwrap_or(DEFAULT_DEBEVEC_SAMPLES),
                smoothness: self.smoothness,
            },
            ResponseKind::Robertson => ResponseStrategy::Robertson {
                max_iterations: self.iterations.unwrap_or(DEFAULT_ROBERTSON_ITERATIONS),
            },
            ResponseKind::Mitsunaga => {
                let defaults = MitsunagaNayarParams::default();
                ResponseStrategy::MitsunagaNayar(MitsunagaNayarParams {
                    degree: self.degree,
                    samples: self.samples.unwrap_or(defaults.samples),
                    full: self.full,
                    max_iterations: self.iterations.unwrap_or(defaults.max_iterations),
                    ..defaults
                })
            }
            ResponseKind::Linear => ResponseStrategy::Fixed(InverseCrf::Linear),
            ResponseKind::Gamma => ResponseStrategy::Fixed(InverseCrf::Gamma(DEFAULT_GAMMA)),
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_with_default(match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    });

    info!("Starting hdr_recon...");
    let config = PipelineConfig::builder()
        .weight_scheme(cli.weight)
        .domain(cli.domain)
        .align(cli.align)
        .response(cli.response_strategy()?)
        .compression(cli.compression)
        .build();
    let mut pipeline = HdrPipeline::new(config);
    for input in &cli.inputs {
        pipeline.add_file(&input.path, input.exposure);
    }

    info!("HDR pipeline initialized");
    info!("Weighting: {:?}, domain: {}", pipeline.config().weight_scheme, pipeline.config().domain);
    info!("Compression: {}", pipeline.config().compression);
    info!("Alignment: {}", if pipeline.config().align { "enabled" } else { "disabled" });

    let (radiance, crf) = pipeline
        .execute_with_response()
        .context("exposure fusion failed")?;
    pipeline
        .save_radiance(&radiance, &cli.output)
        .with_context(|| format!("writing {}", cli.output.display()))?;

    if let Some(path) = &cli.save_response {
        match crf.inverse_crf() {
            Some(curve) => write_response(curve, radiance.channels, path)
                .with_context(|| format!("saving response to {}", path.display()))?,
            None => bail!("no camera response to save"),
        }
    }

    info!(
        output = %cli.output.display(),
        peak = radiance.max_value(),
        "Fusion successful!"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdr_recon_rs::image_pipeline::PairingStrategy;

    #[test]
    fn test_parse_exposure_arg() {
        let arg = parse_exposure_arg("shots/a:b.png:1/4").unwrap();
        assert_eq!(arg.path, PathBuf::from("shots/a:b.png"));
        assert_eq!(arg.exposure, 0.25);
        assert_eq!(parse_exposure_arg("x.png:2").unwrap().exposure, 2.0);
        assert!(parse_exposure_arg("x.png").is_err());
        assert!(parse_exposure_arg(":1").is_err());
        assert!(parse_exposure_arg("x.png:0").is_err());
        assert!(parse_exposure_arg("x.png:1/0").is_err());
    }

    #[test]
    fn test_cli_builds_mitsunaga_strategy() {
        let cli = Cli::parse_from([
            "hdr_recon",
            "a.png:1",
            "b.png:4",
            "--response",
            "mitsunaga",
            "--degree",
            "-3",
            "--full",
            "--iterations",
            "5",
        ]);
        match cli.response_strategy().unwrap() {
            ResponseStrategy::MitsunagaNayar(params) => {
                assert_eq!(params.degree, -3);
                assert!(params.full);
                assert_eq!(params.pairing(), PairingStrategy::AllPairs);
                assert_eq!(params.max_iterations, 5);
                assert_eq!(params.samples, 1000);
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["hdr_recon", "a.png:1", "b.png:2"]);
        assert_eq!(cli.weight, WeightScheme::Debevec97);
        assert_eq!(cli.domain, MergeDomain::Log);
        assert_eq!(cli.compression, TiffCompression::None);
        assert_eq!(
            cli.response_strategy().unwrap(),
            ResponseStrategy::DebevecMalik { samples: 256, smoothness: 20.0 }
        );
    }
}
