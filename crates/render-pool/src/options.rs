//! PDF render options
//!
//! [`PdfOptions`] is the options bag carried by every job. The pool never looks
//! inside it; only a renderer interprets it, by calling [`PdfOptions::layout`].
//! Field names follow the camelCase JSON accepted by the HTTP API:
//!
//! ```json
//! { "format": "A4", "landscape": true, "margin": { "top": "1cm", "bottom": 40 } }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const PX_PER_INCH: f64 = 96.0;
const CM_PER_INCH: f64 = 2.54;
const MM_PER_INCH: f64 = 25.4;

/// Options passed through to the renderer. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfOptions {
    /// Named paper size, e.g. "A4" or "letter"
    pub format: Option<String>,
    /// Paper width; overrides `format`
    pub width: Option<Length>,
    /// Paper height; overrides `format`
    pub height: Option<Length>,
    pub landscape: Option<bool>,
    pub print_background: Option<bool>,
    /// Rendering scale, 0.1 to 2.0
    pub scale: Option<f64>,
    pub margin: Option<Margin>,
    /// Page ranges to print, e.g. "1-5, 8"
    pub page_ranges: Option<String>,
    pub display_header_footer: Option<bool>,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    #[serde(rename = "preferCSSPageSize")]
    pub prefer_css_page_size: Option<bool>,
}

/// Page margins
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Margin {
    pub top: Option<Length>,
    pub right: Option<Length>,
    pub bottom: Option<Length>,
    pub left: Option<Length>,
}

/// A CSS length: a bare number is pixels, strings may carry px/in/cm/mm units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Length {
    Pixels(f64),
    Css(String),
}

impl Length {
    /// Convert to inches (96px per inch)
    pub fn to_inches(&self) -> Result<f64, OptionsError> {
        let inches = match self {
            Length::Pixels(px) => px / PX_PER_INCH,
            Length::Css(raw) => parse_css_length(raw)?,
        };
        if !inches.is_finite() || inches < 0.0 {
            return Err(OptionsError(format!("length must be non-negative: {:?}", self)));
        }
        Ok(inches)
    }
}

fn parse_css_length(raw: &str) -> Result<f64, OptionsError> {
    let value = raw.trim().to_ascii_lowercase();
    let (number, divisor) = if let Some(n) = value.strip_suffix("px") {
        (n, PX_PER_INCH)
    } else if let Some(n) = value.strip_suffix("in") {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix("cm") {
        (n, CM_PER_INCH)
    } else if let Some(n) = value.strip_suffix("mm") {
        (n, MM_PER_INCH)
    } else {
        (value.as_str(), PX_PER_INCH)
    };

    number
        .trim()
        .parse::<f64>()
        .map(|n| n / divisor)
        .map_err(|_| OptionsError(format!("invalid length '{}'", raw)))
}

/// Named paper sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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
    /// Width and height in inches (portrait)
    pub fn dimensions(&self) -> (f64, f64) {
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
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "letter" => Ok(PaperFormat::Letter),
            "legal" => Ok(PaperFormat::Legal),
            "tabloid" => Ok(PaperFormat::Tabloid),
            "ledger" => Ok(PaperFormat::Ledger),
            "a0" => Ok(PaperFormat::A0),
            "a1" => Ok(PaperFormat::A1),
            "a2" => Ok(PaperFormat::A2),
            "a3" => Ok(PaperFormat::A3),
            "a4" => Ok(PaperFormat::A4),
            "a5" => Ok(PaperFormat::A5),
            "a6" => Ok(PaperFormat::A6),
            other => Err(OptionsError(format!("unknown paper format '{}'", other))),
        }
    }
}

/// An option value the renderer cannot honor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionsError(pub String);

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid PDF option: {}", self.0)
    }
}

impl std::error::Error for OptionsError {}

/// Resolved page geometry, all lengths in inches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub scale: f64,
}

impl PdfOptions {
    /// Resolve paper size, margins, and scale. Explicit width/height win over `format`;
    /// the default paper is Letter with zero margins.
    pub fn layout(&self) -> Result<PageLayout, OptionsError> {
        let (mut paper_width, mut paper_height) = match &self.format {
            Some(name) => name.parse::<PaperFormat>()?.dimensions(),
            None => PaperFormat::Letter.dimensions(),
        };
        if let Some(width) = &self.width {
            paper_width = width.to_inches()?;
        }
        if let Some(height) = &self.height {
            paper_height = height.to_inches()?;
        }
        if paper_width == 0.0 || paper_height == 0.0 {
            return Err(OptionsError("paper size must be non-zero".to_string()));
        }

        let margin = self.margin.clone().unwrap_or_default();
        let side = |length: &Option<Length>| -> Result<f64, OptionsError> {
            length.as_ref().map(Length::to_inches).unwrap_or(Ok(0.0))
        };

        let scale = self.scale.unwrap_or(1.0);
        if !(0.1..=2.0).contains(&scale) {
            return Err(OptionsError(format!(
                "scale must be between 0.1 and 2.0 (got {})",
                scale
            )));
        }

        Ok(PageLayout {
            paper_width,
            paper_height,
            margin_top: side(&margin.top)?,
            margin_right: side(&margin.right)?,
            margin_bottom: side(&margin.bottom)?,
            margin_left: side(&margin.left)?,
            scale,
        })
    }
}
