use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use printd_lib::server::MISSING_INPUT;
use printd_lib::{
    telemetry, ChromeFactory, Config, PrintdError, RenderOptions, RenderPipeline, RendererPool,
    Viewport,
};
use tracing::{debug, info};

use crate::cli::RenderInput;
use crate::formatting::{render_error, write_output};
use crate::settings::{apply_verbosity, load_config, one_shot};

/// Convert one HTML file or URL to a PDF file.
pub async fn run_render(
    config_path: Option<PathBuf>,
    verbose: bool,
    input: RenderInput,
    options: Option<PathBuf>,
    viewport: Option<Viewport>,
    output: PathBuf,
) -> ExitCode {
    match render(config_path, verbose, input, options, viewport, &output).await {
        Ok(size) => {
            info!(bytes = size, output = %output.display(), "wrote PDF");
            ExitCode::SUCCESS
        }
        Err(err) => render_error(err),
    }
}

async fn render(
    config_path: Option<PathBuf>,
    verbose: bool,
    input: RenderInput,
    options: Option<PathBuf>,
    viewport: Option<Viewport>,
    output: &Path,
) -> Result<usize, PrintdError> {
    let config = prepare(config_path, verbose)?;
    let mut options = match options {
        Some(path) => read_options(&path)?,
        None => RenderOptions::default(),
    };
    if let Some(viewport) = viewport {
        options.set_viewport(viewport);
    }
    // Read inputs before starting a browser so bad paths fail fast.
    let html = match &input.html_file {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };

    let pipeline = one_shot_pipeline(&config);
    let result = match (html, input.url) {
        (Some(html), _) => pipeline.html_to_pdf(&html, &options).await,
        (None, Some(url)) => pipeline.url_to_pdf(&url, &options).await,
        (None, None) => Err(PrintdError::validation(MISSING_INPUT)),
    };
    pipeline.pool().drain(None).await;

    let pdf = result?;
    write_output(&pdf, Some(output))?;
    Ok(pdf.len())
}

/// Print (or save) the fully-loaded markup of a URL.
pub async fn run_fetch(
    config_path: Option<PathBuf>,
    verbose: bool,
    url: String,
    output: Option<PathBuf>,
) -> ExitCode {
    let fetched = async {
        let config = prepare(config_path, verbose)?;
        let pipeline = one_shot_pipeline(&config);
        let result = pipeline.fetch_html(&url, &RenderOptions::default()).await;
        pipeline.pool().drain(None).await;
        let markup = result?;
        write_output(markup.as_bytes(), output.as_deref())?;
        Ok::<_, PrintdError>(markup.len())
    };

    match fetched.await {
        Ok(size) => {
            debug!(bytes = size, %url, "fetched markup");
            ExitCode::SUCCESS
        }
        Err(err) => render_error(err),
    }
}

fn prepare(config_path: Option<PathBuf>, verbose: bool) -> Result<Config, PrintdError> {
    let (mut config, source) = load_config(config_path.as_deref())?;
    apply_verbosity(&mut config, verbose);
    one_shot(&mut config);
    config.validate()?;
    telemetry::init(&config.logging)?;
    debug!("{}", config.summary(source.as_deref()));
    Ok(config)
}

fn one_shot_pipeline(config: &Config) -> RenderPipeline {
    let factory = Arc::new(ChromeFactory::new(config.chrome_options()));
    RenderPipeline::new(RendererPool::new(config.pool_config(), factory))
}

fn read_options(path: &Path) -> Result<RenderOptions, PrintdError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
