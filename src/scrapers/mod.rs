//! Scraper boundary.
//!
//! The pipeline only needs "given a source, produce raw article records";
//! how the HTML is fetched and which fields are extracted is up to the
//! implementation. [`html::HtmlScraper`] is the selector-based one shipped
//! with the binary.
//!
//! # Extraction hints
//!
//! | Hint | Meaning |
//! |------|---------|
//! | `title` | one match per article; required (a default is used when absent) |
//! | `link` | href from the title's own item (smallest ancestor holding no other title), when the title has no anchor |
//! | `summary` | n-th match gives the n-th article's summary |
//! | `content` | n-th match gives the n-th article's body |
//! | `time` | n-th match gives the publish time (`datetime` attribute preferred) |

pub mod html;

use crate::error::ScrapeError;
use crate::models::{RawArticle, Source};
use async_trait::async_trait;

/// Produces raw article records for one source.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, source: &Source) -> Result<Vec<RawArticle>, ScrapeError>;
}
