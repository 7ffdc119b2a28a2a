use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::image_pipeline::{
    align::{Aligner, MtbAligner, accumulate_offsets, shift_image},
    common::{ExposureImage, HdrError, RadianceMap, Result},
    conversions::types::{PipelineConfig, ResponseStrategy},
    exposure::{AutoReader, ExposureReader},
    merge::Merger,
    response::CrfEstimator,
    tiff::{RadianceWriter, StandardTiffWriter},
};

#[derive(Debug, Clone)]
struct ExposureInput {
    path: PathBuf,
    exposure: f32,
}

/// Loads an exposure stack, optionally registers it, obtains a camera
/// response and fuses everything into one radiance map.
///
/// Files are only read when the pipeline executes. Every stage runs after
/// the previous one has finished; a failing stage aborts the run and nothing
/// is written.
pub struct HdrPipeline<R: ExposureReader, A: Aligner, W: RadianceWriter> {
    reader: R,
    aligner: A,
    writer: W,
    config: PipelineConfig,
    inputs: Vec<ExposureInput>,
}

impl HdrPipeline<AutoReader, MtbAligner, StandardTiffWriter> {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            reader: AutoReader::default(),
            aligner: MtbAligner::default(),
            writer: StandardTiffWriter,
            config,
            inputs: Vec::new(),
        }
    }
}

impl<R: ExposureReader, A: Aligner, W: RadianceWriter> HdrPipeline<R, A, W> {
    pub fn with_custom(reader: R, aligner: A, writer: W, config: PipelineConfig) -> Self {
        Self {
            reader,
            aligner,
            writer,
            config,
            inputs: Vec::new(),
        }
    }

    /// Queues an exposure file with its exposure time in seconds.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P, exposure: f32) -> &mut Self {
        self.inputs.push(ExposureInput {
            path: path.as_ref().to_path_buf(),
            exposure,
        });
        self
    }

    pub fn files(&self) -> impl Iterator<Item = (&Path, f32)> + '_ {
        self.inputs.iter().map(|input| (input.path.as_path(), input.exposure))
    }

    pub fn clear_files(&mut self) {
        self.inputs.clear();
    }

    fn load(&self) -> Result<Vec<ExposureImage>> {
        self.inputs
            .iter()
            .map(|input| {
                let path = input.path.as_path();
                let _span = tracing::info_span!("load_exposure", path = %path.display(), exposure = input.exposure)
                    .entered();
                if !(input.exposure.is_finite() && input.exposure > 0.0) {
                    return Err(HdrError::InvalidParameter(format!(
                        "{}: exposure time must be positive, got {}",
                        path.display(),
                        input.exposure
                    )));
                }
                let bytes = std::fs::read(path)
                    .map_err(|e| HdrError::InputReadError(format!("{}: {}", path.display(), e)))?;
                let frame = self.reader.read_frame(&bytes)?;
                ExposureImage::from_frame(frame, input.exposure)
            })
            .collect()
    }

    fn validate_dimensions(&self, images: &[ExposureImage]) -> Result<()> {
        if !self.config.validate_dimensions {
            return Ok(());
        }

        let Some(first) = images.first() else {
            return Ok(());
        };
        for (image, input) in images.iter().zip(&self.inputs).skip(1) {
            if !image.same_shape(first) {
                return Err(HdrError::ShapeMismatch(format!(
                    "{} is {}x{}x{}, expected {}x{}x{}",
                    input.path.display(),
                    image.width(),
                    image.height(),
                    image.channels(),
                    first.width(),
                    first.height(),
                    first.channels()
                )));
            }
        }
        Ok(())
    }

    /// Registers every exposure onto the longest one. Returns the stack in
    /// ascending exposure order; unshifted frames are borrowed.
    fn align<'a>(&self, images: &'a [ExposureImage]) -> Result<Vec<Cow<'a, ExposureImage>>> {
        let mut order: Vec<&ExposureImage> = images.iter().collect();
        order.sort_by(|a, b| a.exposure().total_cmp(&b.exposure()));

        let pairwise = order
            .windows(2)
            .map(|pair| self.aligner.align(pair[1], pair[0]))
            .collect::<Result<Vec<_>>>()?;
        let offsets = accumulate_offsets(&pairwise);

        order
            .into_iter()
            .zip(offsets)
            .map(|(image, (dx, dy))| {
                if (dx, dy) == (0, 0) {
                    Ok(Cow::Borrowed(image))
                } else {
                    info!(exposure = image.exposure(), dx, dy, "Shifting exposure");
                    shift_image(image, dx, dy).map(Cow::Owned)
                }
            })
            .collect()
    }

    /// Obtains the camera response for the merge. A single exposure carries
    /// no brightness ratios to fit, so it is merged with its values as is.
    fn estimate(&self, stack: &mut [Cow<'_, ExposureImage>]) -> Result<CrfEstimator> {
        let mut crf = CrfEstimator::new();
        if stack.len() < 2 && !matches!(self.config.response, ResponseStrategy::Fixed(_)) {
            warn!(
                exposures = stack.len(),
                "Too few exposures to fit a response; merging values as recorded"
            );
            return Ok(crf);
        }
        match &self.config.response {
            ResponseStrategy::Fixed(curve) => {
                curve.validate()?;
                crf = CrfEstimator::with_curve(curve.clone());
            }
            ResponseStrategy::DebevecMalik { samples, smoothness } => {
                crf.estimate_debevec_malik(stack, self.config.weight_scheme, *samples, *smoothness)?;
            }
            ResponseStrategy::MitsunagaNayar(params) => {
                let report = crf.estimate_mitsunaga_nayar(stack, params)?;
                info!(degree = report.degree, residual = report.residual, "Polynomial response selected");
            }
            ResponseStrategy::Robertson { max_iterations } => {
                let report = crf.estimate_robertson(stack, *max_iterations)?;
                info!(
                    iterations = report.iterations,
                    converged = report.converged,
                    "Robertson response finished"
                );
            }
        }
        Ok(crf)
    }

    /// Runs the pipeline and returns the radiance map together with the
    /// response that linearized it.
    #[instrument(skip(self), fields(exposures = self.inputs.len()))]
    pub fn execute_with_response(&self) -> Result<(RadianceMap, CrfEstimator)> {
        info!("Starting exposure fusion");
        if self.inputs.is_empty() {
            return Err(HdrError::TooFewExposures(0));
        }

        let images = {
            let _span = tracing::info_span!("load").entered();
            self.load()?
        };

        {
            let _span = tracing::info_span!("validate_dimensions").entered();
            self.validate_dimensions(&images)?;
        }

        let mut stack = if self.config.align && images.len() > 1 {
            let _span = tracing::info_span!("align").entered();
            self.align(&images)?
        } else {
            images.iter().map(Cow::Borrowed).collect()
        };

        let crf = {
            let _span = tracing::info_span!("estimate_response").entered();
            self.estimate(&mut stack)?
        };

        let radiance = {
            let _span = tracing::info_span!("merge").entered();
            Merger::assemble(&stack, Some(&crf), self.config.weight_scheme, self.config.domain)?
        };

        info!(
            width = radiance.width,
            height = radiance.height,
            response = ?crf.state(),
            "Exposure fusion complete"
        );
        Ok((radiance, crf))
    }

    pub fn execute(&self) -> Result<RadianceMap> {
        self.execute_with_response().map(|(radiance, _)| radiance)
    }

    pub fn write_radiance(&self, radiance: &RadianceMap, output: &mut dyn Write) -> Result<()> {
        let _span = tracing::info_span!("encode_tiff").entered();
        self.writer.write_radiance(radiance, output, self.config.compression)
    }

    #[instrument(skip(self, radiance, output_path))]
    pub fn save_radiance<Q: AsRef<Path>>(&self, radiance: &RadianceMap, output_path: Q) -> Result<()> {
        let output_path = output_path.as_ref();
        let mut buffer = Vec::new();
        self.write_radiance(radiance, &mut buffer)?;

        let mut output_file = {
            let _span = tracing::info_span!("create_output_file").entered();
            std::fs::File::create(output_path).map_err(|e| {
                HdrError::OutputWriteError(format!("{}: {}", output_path.display(), e))
            })?
        };
        output_file
            .write_all(&buffer)
            .map_err(|e| HdrError::OutputWriteError(format!("{}: {}", output_path.display(), e)))?;

        info!(output = %output_path.display(), bytes = buffer.len(), "Radiance map written");
        Ok(())
    }

    /// Executes the pipeline and writes the result. The output file is only
    /// created once the radiance map exists.
    pub fn execute_to_file<Q: AsRef<Path>>(&self, output_path: Q) -> Result<RadianceMap> {
        let radiance = self.execute()?;
        self.save_radiance(&radiance, output_path)?;
        Ok(radiance)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PipelineConfig) {
        self.config = config;
    }
}
