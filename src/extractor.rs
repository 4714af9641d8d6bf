use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::types::{ExtractError, PageMetadata};

/// Lower-cased tokens that flag a page as carrying affiliate content.
pub const AFFILIATE_MARKERS: [&str; 4] = ["affiliate", "affiliates", "partner", "partners"];

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<PageMetadata, ExtractError>;
}

/// Fetches the raw document with the client's default timeout and inspects it.
pub struct HtmlExtractor {
    client: Client,
}

impl HtmlExtractor {
    pub fn new(client: Client) -> Self {
        HtmlExtractor { client }
    }
}

#[async_trait]
impl MetadataExtractor for HtmlExtractor {
    async fn extract(&self, url: &str) -> Result<PageMetadata, ExtractError> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_metadata(&body)
    }
}

/// First h1 and h2 text (empty when absent) plus the affiliate flag.
pub fn parse_metadata(body: &str) -> Result<PageMetadata, ExtractError> {
    let document = Html::parse_document(body);
    Ok(PageMetadata {
        h1: first_text(&document, "h1")?,
        h2: first_text(&document, "h2")?,
        affiliate: has_affiliate_marker(body),
    })
}

fn first_text(document: &Html, tag: &str) -> Result<String, ExtractError> {
    let selector =
        Selector::parse(tag).map_err(|e| ExtractError::Selector(format!("{}: {}", tag, e)))?;
    Ok(document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default())
}

/// Scans the raw document, markup included, case-insensitively.
pub fn has_affiliate_marker(body: &str) -> bool {
    let lowered = body.to_lowercase();
    AFFILIATE_MARKERS.iter().any(|m| lowered.contains(m))
}
