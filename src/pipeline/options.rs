//! Caller-facing options bag and its resolution into concrete render settings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PrintdError, Result};
use crate::viewport::{DEFAULT_DEVICE_SCALE_FACTOR, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::Viewport;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_SELECTOR_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MARGIN: &str = "1cm";
pub const DEFAULT_FILENAME: &str = "document.pdf";

/// Options as they arrive on the wire. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    pub format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Device scale factor of the rendering surface.
    pub scale: Option<f64>,
    /// Scale applied to the printed document.
    pub pdf_scale: Option<f64>,
    pub landscape: Option<bool>,
    pub margin: Option<MarginOptions>,
    pub print_background: Option<bool>,
    pub css: Option<String>,
    #[serde(rename = "preferCSSPageSize")]
    pub prefer_css_page_size: Option<bool>,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    /// Milliseconds to pause before producing output.
    pub delay: Option<u64>,
    pub wait_for_selector: Option<String>,
    /// Milliseconds to wait for `wait_for_selector`.
    pub selector_timeout: Option<u64>,
    /// Milliseconds allowed for loading content.
    pub timeout: Option<u64>,
    pub page_ranges: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarginOptions {
    pub top: Option<CssLength>,
    pub right: Option<CssLength>,
    pub bottom: Option<CssLength>,
    pub left: Option<CssLength>,
}

/// A CSS length such as `"1cm"`, `"12mm"`, `"0.5in"` or a bare pixel count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CssLength {
    Pixels(f64),
    Text(String),
}

impl CssLength {
    pub fn to_inches(&self) -> Result<f64> {
        match self {
            CssLength::Pixels(px) => finite_non_negative(*px / 96.0, &px.to_string()),
            CssLength::Text(raw) => parse_length_inches(raw),
        }
    }
}

fn finite_non_negative(value: f64, raw: &str) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(PrintdError::validation(format!("Invalid length: {raw}")))
    }
}

/// Converts a CSS length to inches. Unitless values are pixels.
pub fn parse_length_inches(raw: &str) -> Result<f64> {
    let text = raw.trim().to_ascii_lowercase();
    let (number, divisor) = if let Some(n) = text.strip_suffix("px") {
        (n, 96.0)
    } else if let Some(n) = text.strip_suffix("in") {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix("cm") {
        (n, 2.54)
    } else if let Some(n) = text.strip_suffix("mm") {
        (n, 25.4)
    } else {
        (text.as_str(), 96.0)
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| PrintdError::validation(format!("Invalid length: {raw}")))?;
    finite_non_negative(value / divisor, raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperFormat {
    Letter,
    Legal,
    Tabloid,
    Ledger,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
}

impl PaperFormat {
    /// Portrait width and height in inches.
    pub fn dimensions(self) -> (f64, f64) {
        match self {
            PaperFormat::Letter => (8.5, 11.0),
            PaperFormat::Legal => (8.5, 14.0),
            PaperFormat::Tabloid => (11.0, 17.0),
            PaperFormat::Ledger => (17.0, 11.0),
            PaperFormat::A0 => (33.1, 46.8),
            PaperFormat::A1 => (23.4, 33.1),
            PaperFormat::A2 => (16.54, 23.4),
            PaperFormat::A3 => (11.7, 16.54),
            PaperFormat::A4 => (8.27, 11.7),
            PaperFormat::A5 => (5.83, 8.27),
            PaperFormat::A6 => (4.13, 5.83),
        }
    }
}

impl FromStr for PaperFormat {
    type Err = PrintdError;

    fn from_str(s: &str) -> Result<Self> {
        let format = match s.trim().to_ascii_lowercase().as_str() {
            "letter" => PaperFormat::Letter,
            "legal" => PaperFormat::Legal,
            "tabloid" => PaperFormat::Tabloid,
            "ledger" => PaperFormat::Ledger,
            "a0" => PaperFormat::A0,
            "a1" => PaperFormat::A1,
            "a2" => PaperFormat::A2,
            "a3" => PaperFormat::A3,
            "a4" => PaperFormat::A4,
            "a5" => PaperFormat::A5,
            "a6" => PaperFormat::A6,
            _ => {
                return Err(PrintdError::validation(format!(
                    "Unknown paper format '{s}'. Supported: Letter, Legal, Tabloid, Ledger, A0-A6"
                )))
            }
        };
        Ok(format)
    }
}

impl fmt::Display for PaperFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Page margins in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margin {
    pub fn uniform(inches: f64) -> Self {
        Self {
            top: inches,
            right: inches,
            bottom: inches,
            left: inches,
        }
    }
}

impl Default for Margin {
    fn default() -> Self {
        Self::uniform(1.0 / 2.54)
    }
}

/// Everything the renderer needs to print one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfOptions {
    pub format: PaperFormat,
    pub landscape: bool,
    pub margin: Margin,
    pub print_background: bool,
    pub scale: f64,
    pub prefer_css_page_size: bool,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub page_ranges: Option<String>,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            format: PaperFormat::A4,
            landscape: false,
            margin: Margin::default(),
            print_background: true,
            scale: 1.0,
            prefer_css_page_size: false,
            header_template: None,
            footer_template: None,
            page_ranges: None,
        }
    }
}

impl PdfOptions {
    /// Header/footer display only turns on when a template was supplied.
    pub fn display_header_footer(&self) -> bool {
        self.header_template.is_some() || self.footer_template.is_some()
    }
}

/// Options after defaults are applied and values validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub viewport: Viewport,
    pub load_timeout: Duration,
    pub css: Option<String>,
    pub wait_for_selector: Option<String>,
    pub selector_timeout: Duration,
    pub delay: Duration,
    pub pdf: PdfOptions,
    pub filename: String,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

impl RenderOptions {
    /// Overrides width, height and scale with an explicit surface.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.width = Some(viewport.width);
        self.height = Some(viewport.height);
        self.scale = Some(viewport.device_scale_factor);
    }

    pub fn resolve(&self) -> Result<ResolvedOptions> {
        let width = self.width.unwrap_or(DEFAULT_WIDTH);
        let height = self.height.unwrap_or(DEFAULT_HEIGHT);
        if width == 0 || height == 0 {
            return Err(PrintdError::validation("width and height must be positive"));
        }
        let device_scale_factor = self.scale.unwrap_or(DEFAULT_DEVICE_SCALE_FACTOR);
        if !device_scale_factor.is_finite() || device_scale_factor <= 0.0 {
            return Err(PrintdError::validation("scale must be a positive number"));
        }

        let pdf_scale = self.pdf_scale.unwrap_or(1.0);
        if !(0.1..=2.0).contains(&pdf_scale) {
            return Err(PrintdError::validation("pdfScale must be between 0.1 and 2"));
        }

        if self.timeout == Some(0) {
            return Err(PrintdError::validation("timeout must be at least 1 ms"));
        }

        let format = match non_empty(&self.format) {
            Some(raw) => raw.parse()?,
            None => PaperFormat::A4,
        };

        let margin = self.resolve_margin()?;

        Ok(ResolvedOptions {
            viewport: Viewport {
                width,
                height,
                device_scale_factor,
            },
            load_timeout: self
                .timeout
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_LOAD_TIMEOUT),
            css: non_empty(&self.css),
            wait_for_selector: non_empty(&self.wait_for_selector),
            selector_timeout: self
                .selector_timeout
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SELECTOR_TIMEOUT),
            delay: Duration::from_millis(self.delay.unwrap_or(0)),
            pdf: PdfOptions {
                format,
                landscape: self.landscape.unwrap_or(false),
                margin,
                print_background: self.print_background.unwrap_or(true),
                scale: pdf_scale,
                prefer_css_page_size: self.prefer_css_page_size.unwrap_or(false),
                header_template: non_empty(&self.header_template),
                footer_template: non_empty(&self.footer_template),
                page_ranges: non_empty(&self.page_ranges),
            },
            filename: sanitize_filename(self.filename.as_deref()),
        })
    }

    fn resolve_margin(&self) -> Result<Margin> {
        let default = parse_length_inches(DEFAULT_MARGIN)?;
        let side = |value: Option<&CssLength>| match value {
            Some(length) => length.to_inches(),
            None => Ok(default),
        };
        let margin = self.margin.clone().unwrap_or_default();
        Ok(Margin {
            top: side(margin.top.as_ref())?,
            right: side(margin.right.as_ref())?,
            bottom: side(margin.bottom.as_ref())?,
            left: side(margin.left.as_ref())?,
        })
    }
}

/// Makes a caller-supplied filename safe to embed in a quoted header value.
pub fn sanitize_filename(raw: Option<&str>) -> String {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return DEFAULT_FILENAME.to_string();
    }
    trimmed
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
