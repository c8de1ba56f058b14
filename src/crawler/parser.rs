//! HTML parsing for catalog and detail pages
//!
//! Catalog pages yield the ordered detail links, whether a next page exists
//! and, when shown, the total page count. Detail pages yield a
//! [`CrawledRecord`].

use crate::catalog::{CrawledRecord, ProductFields};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

/// A detail page that could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("No product name found on {0}")]
    MissingName(String),
}

/// What a catalog page links to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogPage {
    /// Absolute detail URLs in document order
    pub detail_urls: Vec<String>,
    pub has_next: bool,
    pub total_pages: Option<u32>,
}

/// Extracts links and records from fetched HTML
pub trait PageParser: Send + Sync {
    fn parse_catalog(&self, html: &str, page_url: &Url) -> CatalogPage;

    fn parse_detail(&self, html: &str, url: &str) -> Result<CrawledRecord, ParseFailure>;
}

/// Returns the catalog URL for a one-based page number
///
/// Page 1 is the site index; later pages live under `/catalogue/`.
pub fn catalog_url(base_url: &str, page: u32) -> String {
    let base = base_url.trim_end_matches('/');
    if page <= 1 {
        format!("{}/index.html", base)
    } else {
        format!("{}/catalogue/page-{}.html", base, page)
    }
}

/// Parser for the book catalog markup
#[derive(Debug, Clone, Copy, Default)]
pub struct BookPageParser;

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

/// Collapses runs of whitespace into single spaces
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reads the first number in a string such as `Â£51.77`
fn extract_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.trim_end_matches('.').parse().ok()
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .next()
        .map(|element| collapse_whitespace(&element_text(element)))
        .filter(|s| !s.is_empty())
}

fn rating_from_word(word: &str) -> Option<u8> {
    match word {
        "One" => Some(1),
        "Two" => Some(2),
        "Three" => Some(3),
        "Four" => Some(4),
        "Five" => Some(5),
        _ => None,
    }
}

impl BookPageParser {
    pub fn new() -> Self {
        Self
    }

    /// Looks up a row of the product information table by its header
    fn table_value(document: &Html, label: &str) -> Option<String> {
        let rows = selector("table.table-striped tr")?;
        let th = selector("th")?;
        let td = selector("td")?;

        document.select(&rows).find_map(|row| {
            let header = row.select(&th).next().map(element_text)?;
            if header.trim() != label {
                return None;
            }
            row.select(&td)
                .next()
                .map(|cell| collapse_whitespace(&element_text(cell)))
        })
    }

    fn price(document: &Html, label: &str) -> f64 {
        Self::table_value(document, label)
            .and_then(|value| extract_number(&value))
            .unwrap_or(0.0)
    }

    fn description(document: &Html) -> String {
        first_text(document, "#product_description ~ p").unwrap_or_default()
    }

    fn category(document: &Html) -> String {
        let Some(sel) = selector("ul.breadcrumb a") else {
            return "Unknown".to_string();
        };
        let links: Vec<_> = document.select(&sel).collect();
        if links.len() >= 2 {
            links
                .last()
                .map(|link| collapse_whitespace(&element_text(*link)))
                .unwrap_or_else(|| "Unknown".to_string())
        } else {
            "Unknown".to_string()
        }
    }

    fn rating(document: &Html) -> u8 {
        selector("p.star-rating")
            .and_then(|sel| {
                document
                    .select(&sel)
                    .next()
                    .and_then(|p| p.value().classes().find_map(rating_from_word))
            })
            .unwrap_or(0)
    }

    fn image_url(document: &Html, page_url: &str) -> String {
        let src = selector("div.item.active img").and_then(|sel| {
            document
                .select(&sel)
                .next()
                .and_then(|img| img.value().attr("src"))
                .map(str::to_string)
        });

        match (src, Url::parse(page_url)) {
            (Some(src), Ok(base)) => base
                .join(&src)
                .map(|u| u.to_string())
                .unwrap_or(src),
            (Some(src), Err(_)) => src,
            (None, _) => String::new(),
        }
    }

    fn total_pages(document: &Html) -> Option<u32> {
        // "Page 1 of 50"
        let text = first_text(document, "li.current")?;
        let (_, total) = text.rsplit_once(" of ")?;
        total.trim().parse().ok()
    }
}

impl PageParser for BookPageParser {
    fn parse_catalog(&self, html: &str, page_url: &Url) -> CatalogPage {
        let document = Html::parse_document(html);

        let detail_urls = selector("article.product_pod h3 a")
            .map(|sel| {
                document
                    .select(&sel)
                    .filter_map(|a| a.value().attr("href"))
                    .filter_map(|href| match page_url.join(href) {
                        Ok(url) => Some(url.to_string()),
                        Err(e) => {
                            tracing::debug!("Skipping unresolvable link '{}': {}", href, e);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let has_next = selector("li.next a")
            .map(|sel| document.select(&sel).next().is_some())
            .unwrap_or(false);

        CatalogPage {
            detail_urls,
            has_next,
            total_pages: Self::total_pages(&document),
        }
    }

    fn parse_detail(&self, html: &str, url: &str) -> Result<CrawledRecord, ParseFailure> {
        let document = Html::parse_document(html);

        let name = first_text(&document, "h1")
            .ok_or_else(|| ParseFailure::MissingName(url.to_string()))?;

        let fields = ProductFields {
            name,
            description: Self::description(&document),
            category: Self::category(&document),
            price_excl_tax: Self::price(&document, "Price (excl. tax)"),
            price_incl_tax: Self::price(&document, "Price (incl. tax)"),
            availability: first_text(&document, "p.instock.availability")
                .unwrap_or_else(|| "Unknown".to_string()),
            num_reviews: Self::table_value(&document, "Number of reviews")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            image_url: Self::image_url(&document, url),
            rating: Self::rating(&document),
        };

        Ok(CrawledRecord::new(url, fields, html.to_string()))
    }
}
