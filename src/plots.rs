use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::engine::{Engine, EngineError};
use crate::protocol::{MessageSink, SideMessage};

pub const PLOT_BACKEND_KEY: &str = "kernel_plot_backend";
pub const PLOT_FORMAT_KEY: &str = "kernel_plot_format";
pub const PLOT_RESOLUTION_KEY: &str = "kernel_plot_resolution";

/// Used when the engine cannot report its screen resolution.
const FALLBACK_RESOLUTION_DPI: u32 = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotBackend {
    /// Figures are rendered to files and sent as display artifacts.
    Inline,
    /// Figures stay on screen as native windows; no extraction happens.
    Native,
}

impl PlotBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "inline" => Some(PlotBackend::Inline),
            "native" => Some(PlotBackend::Native),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlotBackend::Inline => "inline",
            PlotBackend::Native => "native",
        }
    }
}

/// Renderer format codes accepted by the engine's print capability. The set
/// is closed; everything else is rejected before any rendering occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotFormat {
    Png,
    Svg,
    Jpeg,
    Tiff,
    Tiffn,
    Meta,
    Pdf,
    Eps,
    Epsc,
    Eps2,
    Eps2c,
}

impl PlotFormat {
    #[cfg(test)]
    pub const ALL: [PlotFormat; 11] = [
        PlotFormat::Png,
        PlotFormat::Svg,
        PlotFormat::Jpeg,
        PlotFormat::Tiff,
        PlotFormat::Tiffn,
        PlotFormat::Meta,
        PlotFormat::Pdf,
        PlotFormat::Eps,
        PlotFormat::Epsc,
        PlotFormat::Eps2,
        PlotFormat::Eps2c,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "png" => Some(PlotFormat::Png),
            "svg" => Some(PlotFormat::Svg),
            "jpeg" => Some(PlotFormat::Jpeg),
            "tiff" => Some(PlotFormat::Tiff),
            "tiffn" => Some(PlotFormat::Tiffn),
            "meta" => Some(PlotFormat::Meta),
            "pdf" => Some(PlotFormat::Pdf),
            "eps" => Some(PlotFormat::Eps),
            "epsc" => Some(PlotFormat::Epsc),
            "eps2" => Some(PlotFormat::Eps2),
            "eps2c" => Some(PlotFormat::Eps2c),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlotFormat::Png => "png",
            PlotFormat::Svg => "svg",
            PlotFormat::Jpeg => "jpeg",
            PlotFormat::Tiff => "tiff",
            PlotFormat::Tiffn => "tiffn",
            PlotFormat::Meta => "meta",
            PlotFormat::Pdf => "pdf",
            PlotFormat::Eps => "eps",
            PlotFormat::Epsc => "epsc",
            PlotFormat::Eps2 => "eps2",
            PlotFormat::Eps2c => "eps2c",
        }
    }

    /// File extension the renderer produces for this format code.
    pub fn extension(self) -> &'static str {
        match self {
            PlotFormat::Png => "png",
            PlotFormat::Svg => "svg",
            PlotFormat::Jpeg => "jpg",
            PlotFormat::Tiff | PlotFormat::Tiffn => "tiff",
            PlotFormat::Meta => "emf",
            PlotFormat::Pdf => "pdf",
            PlotFormat::Eps | PlotFormat::Epsc | PlotFormat::Eps2 | PlotFormat::Eps2c => "eps",
        }
    }

    /// Page-oriented formats default to full-page output; the render request
    /// asks for figure-sized output instead.
    fn fit_page(self) -> bool {
        matches!(self, PlotFormat::Pdf)
    }
}

/// Fixed extension -> content type table for rendered artifacts.
pub fn content_type_for_extension(extension: &str) -> Option<&'static str> {
    match extension {
        "png" => Some("image/png"),
        "svg" => Some("image/svg+xml"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "tiff" => Some("image/tiff"),
        "emf" => Some("application/emf"),
        "pdf" => Some("application/pdf"),
        "eps" => Some("application/postscript"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotConfig {
    pub backend: PlotBackend,
    pub format: PlotFormat,
    pub resolution_dpi: u32,
}

#[derive(Debug)]
pub enum PlotError {
    /// An explicitly-set configuration value is invalid. Never silently
    /// replaced with a default.
    Config(String),
    Engine(EngineError),
    Io(std::io::Error),
    /// A produced file whose extension is outside the fixed table. Cannot
    /// happen while the format set stays closed.
    UnknownExtension(String),
}

impl std::fmt::Display for PlotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlotError::Config(message) => write!(f, "{message}"),
            PlotError::Engine(err) => write!(f, "{err}"),
            PlotError::Io(err) => write!(f, "plot io error: {err}"),
            PlotError::UnknownExtension(extension) => {
                write!(f, "no content type for plot extension '{extension}'")
            }
        }
    }
}

impl std::error::Error for PlotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlotError::Engine(err) => Some(err),
            PlotError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EngineError> for PlotError {
    fn from(err: EngineError) -> Self {
        PlotError::Engine(err)
    }
}

impl From<std::io::Error> for PlotError {
    fn from(err: std::io::Error) -> Self {
        PlotError::Io(err)
    }
}

/// Reads the persisted plot backend, defaulting to inline on first use.
pub fn read_plot_backend(engine: &mut dyn Engine) -> Result<PlotBackend, PlotError> {
    match read_state(engine, PLOT_BACKEND_KEY)? {
        Some(raw) => PlotBackend::parse(&raw)
            .ok_or_else(|| PlotError::Config(format!("unknown plot backend '{}'", raw.trim()))),
        None => {
            let default = PlotBackend::Inline;
            engine.set_state(PLOT_BACKEND_KEY, default.as_str())?;
            Ok(default)
        }
    }
}

fn read_plot_format(engine: &mut dyn Engine) -> Result<PlotFormat, PlotError> {
    match read_state(engine, PLOT_FORMAT_KEY)? {
        Some(raw) => PlotFormat::parse(&raw)
            .ok_or_else(|| PlotError::Config(format!("unknown plot format '{}'", raw.trim()))),
        None => {
            let default = PlotFormat::Png;
            engine.set_state(PLOT_FORMAT_KEY, default.as_str())?;
            Ok(default)
        }
    }
}

fn read_plot_resolution(engine: &mut dyn Engine) -> Result<u32, PlotError> {
    match read_state(engine, PLOT_RESOLUTION_KEY)? {
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(PlotError::Config(format!(
                "invalid plot resolution '{}', must be a positive integer",
                raw.trim()
            ))),
        },
        None => {
            let default = engine.screen_dpi().unwrap_or(FALLBACK_RESOLUTION_DPI);
            engine.set_state(PLOT_RESOLUTION_KEY, &default.to_string())?;
            Ok(default)
        }
    }
}

fn read_state(engine: &mut dyn Engine, name: &str) -> Result<Option<String>, PlotError> {
    Ok(engine
        .get_state(name)?
        .filter(|value| !value.trim().is_empty()))
}

/// Reads, validates and (where unset) defaults the full plot configuration.
pub fn read_plot_config(engine: &mut dyn Engine) -> Result<PlotConfig, PlotError> {
    let backend = read_plot_backend(engine)?;
    let format = read_plot_format(engine)?;
    let resolution_dpi = read_plot_resolution(engine)?;
    Ok(PlotConfig {
        backend,
        format,
        resolution_dpi,
    })
}

/// Runs the extraction pipeline after one execution: renders every open
/// figure window to a file in creation order, closes each rendered window so
/// it cannot be re-emitted by a later request, and sends the bytes as
/// display artifacts. A rendering failure for one figure is reported and
/// skipped without aborting the rest. Returns the number of artifacts sent.
pub fn write_plots(engine: &mut dyn Engine, messages: &dyn MessageSink) -> Result<usize, PlotError> {
    let config = read_plot_config(engine)?;
    if config.backend == PlotBackend::Native {
        return Ok(0);
    }

    let dir = tempfile::tempdir()?;
    let figures = engine.open_figures()?;
    let extension = config.format.extension();
    let mut rendered = Vec::new();
    for (index, figure) in figures.into_iter().enumerate() {
        let path = dir.path().join(format!("{:06}.{extension}", index + 1));
        let result = engine.render_figure(
            figure,
            &path,
            config.format.as_str(),
            config.resolution_dpi,
            config.format.fit_page(),
        );
        match result {
            Ok(()) => {
                // Close so the next request's render pass cannot re-emit it.
                if let Err(err) = engine.close_figure(figure) {
                    messages.send(SideMessage::stderr(format!(
                        "matlab-kernel: figure {figure}: {err}\n"
                    )));
                }
                rendered.push(path);
            }
            Err(err) => {
                messages.send(SideMessage::stderr(format!(
                    "matlab-kernel: figure {figure}: {err}\n"
                )));
            }
        }
    }

    for path in &rendered {
        let extension = path
            .extension()
            .and_then(|value| value.to_str())
            .unwrap_or("");
        let content_type = content_type_for_extension(extension)
            .ok_or_else(|| PlotError::UnknownExtension(extension.to_string()))?;
        let bytes = std::fs::read(path)?;
        // Textual formats travel as-is; anything else is base64-encoded.
        let data = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => STANDARD.encode(err.into_bytes()),
        };
        messages.send(SideMessage::DisplayData {
            mime_type: content_type.to_string(),
            data,
        });
    }
    Ok(rendered.len())
}
