use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::error::RenderError;
use crate::engine::{ImageFormat, RenderTarget, Viewport};

/// Inbound render request as received over HTTP
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    /// Inline HTML to render
    #[serde(default)]
    pub html: Option<String>,
    /// Remote page to render
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub full_page: bool,
    /// Pause before capture, in milliseconds
    #[serde(default)]
    pub delay: u64,
    #[serde(default, alias = "type")]
    pub format: ImageFormat,
}

/// A validated request, ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub target: RenderTarget,
    pub viewport: Viewport,
    pub full_page: bool,
    pub delay: Duration,
    pub format: ImageFormat,
}

impl RenderRequest {
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            ..Self::default()
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Check the request without touching the pool.
    ///
    /// Blank `html`/`url` values count as absent.
    pub fn validate(self) -> Result<RenderJob, RenderError> {
        let html = self.html.filter(|h| !h.trim().is_empty());
        let url = self.url.filter(|u| !u.trim().is_empty());

        let target = match (html, url) {
            (Some(html), None) => RenderTarget::Html(html),
            (None, Some(raw)) => RenderTarget::Url(parse_url(raw.trim())?),
            (Some(_), Some(_)) => {
                return Err(RenderError::BadRequest(
                    "provide either html or url, not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(RenderError::BadRequest(
                    "one of html or url is required".to_string(),
                ));
            }
        };

        let viewport = Viewport::new(
            dimension("width", self.width, Viewport::DEFAULT_WIDTH)?,
            dimension("height", self.height, Viewport::DEFAULT_HEIGHT)?,
        );

        Ok(RenderJob {
            target,
            viewport,
            full_page: self.full_page,
            delay: Duration::from_millis(self.delay),
            format: self.format,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, RenderError> {
    let url = Url::parse(raw)
        .map_err(|e| RenderError::BadRequest(format!("invalid url '{raw}': {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(RenderError::BadRequest(format!(
            "unsupported url scheme '{scheme}' (expected http or https)"
        ))),
    }
}

fn dimension(name: &str, value: Option<u32>, default: u32) -> Result<u32, RenderError> {
    match value.unwrap_or(default) {
        0 => Err(RenderError::BadRequest(format!("{name} must be positive"))),
        n if n > Viewport::MAX_EDGE => Err(RenderError::BadRequest(format!(
            "{name} must be at most {}",
            Viewport::MAX_EDGE
        ))),
        n => Ok(n),
    }
}
