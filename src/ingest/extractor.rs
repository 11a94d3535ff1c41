//! Film card extraction
//!
//! This module turns one catalog page into [`RawFilmRecord`]s:
//! - Locating card containers (with a product-link fallback)
//! - Resolving each field independently so one missing value never sinks a card
//! - Normalizing release dates to ISO form
//!
//! Extraction is pure: no network or storage access, and the same page
//! always yields the same records in the same order.

use crate::film::{RawFilmRecord, ReleaseStatus};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;
use url::Url;

/// Class tokens that mark a card container
const CARD_CLASSES: &[&str] = &[
    "product",
    "product-card",
    "product-item",
    "film",
    "film-card",
    "film-item",
    "item",
];

/// Texts that sit in title positions but are not titles
const NON_TITLES: &[&str] = &["Quick Shop", "Buy Now", "View", "Released", "Available"];

const DATE_FORMATS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%B %d %Y", "%b %d %Y", "%m/%d/%Y"];

static SPINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d+)").expect("valid regex"));

static FORMAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Blu-ray|DVD|4K|Collector's Set)").expect("valid regex"));

static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{2})?").expect("valid regex"));

static RELEASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Released|Available)\s+([A-Za-z]+\s+\d{1,2},?\s+\d{4}|\d{1,2}/\d{1,2}/\d{4})")
        .expect("valid regex")
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z]+\s+\d{1,2},?\s+\d{4}|\d{1,2}/\d{1,2}/\d{4})").expect("valid regex")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-z]+ [A-Z]").expect("valid regex"));

static NOT_A_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d|Released|Available|Quick").expect("valid regex"));

static SELECTORS: LazyLock<Selectors> = LazyLock::new(Selectors::new);

struct Selectors {
    containers: Selector,
    product_links: Selector,
    headings: Selector,
    strong: Selector,
    director: Selector,
    director_candidates: Selector,
    time: Selector,
    price: Selector,
    description: Selector,
    feature_items: Selector,
    features: Selector,
    images: Selector,
}

impl Selectors {
    fn new() -> Self {
        let parse = |css: &str| Selector::parse(css).expect("valid selector");
        Self {
            containers: parse("div[class], article[class], li[class]"),
            product_links: parse("a[href*='/films/'], a[href*='/shop/product/']"),
            headings: parse("h1, h2, h3, h4"),
            strong: parse("strong"),
            director: parse(".director"),
            director_candidates: parse("p, span, div"),
            time: parse("time[datetime]"),
            price: parse(".price"),
            description: parse(".description, .synopsis"),
            feature_items: parse(".special-features li"),
            features: parse(".special-features"),
            images: parse("img"),
        }
    }
}

/// A card that could not become a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("card {index} has no usable title")]
    MissingTitle { index: usize },
}

/// Extracts film records from one catalog page
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    base_url: Url,
    release_status: ReleaseStatus,
}

impl RecordExtractor {
    /// `base_url` resolves relative links; every record gets `release_status`
    pub fn new(base_url: Url, release_status: ReleaseStatus) -> Self {
        Self {
            base_url,
            release_status,
        }
    }

    /// Extracts every card with a usable title, in document order
    ///
    /// A page with no cards yields an empty vector. Cards without a title are
    /// skipped and logged.
    ///
    /// # Example
    ///
    /// ```
    /// use spine_tracker::film::ReleaseStatus;
    /// use spine_tracker::ingest::RecordExtractor;
    /// use url::Url;
    ///
    /// let html = r#"<div class="film-card"><h3>Ugetsu</h3><span>#3</span></div>"#;
    /// let base = Url::parse("https://example.com/shop/browse").unwrap();
    /// let records = RecordExtractor::new(base, ReleaseStatus::Released).extract(html);
    ///
    /// assert_eq!(records.len(), 1);
    /// assert_eq!(records[0].title, "Ugetsu");
    /// assert_eq!(records[0].spine_number, Some(3));
    /// ```
    pub fn extract(&self, html: &str) -> Vec<RawFilmRecord> {
        let document = Html::parse_document(html);
        let cards = find_cards(&document);
        tracing::debug!(url = %self.base_url, cards = cards.len(), "Found candidate cards");

        let mut records = Vec::with_capacity(cards.len());
        for (index, card) in cards.into_iter().enumerate() {
            match self.extract_card(index, card) {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!(url = %self.base_url, "Skipping card: {}", e),
            }
        }
        records
    }

    fn extract_card(&self, index: usize, card: ElementRef<'_>) -> Result<RawFilmRecord, ExtractError> {
        let title = extract_title(card).ok_or(ExtractError::MissingTitle { index })?;
        let text = element_text(card);

        let mut record = RawFilmRecord::new(title, self.release_status);
        record.director = extract_director(card, &record.title);
        record.spine_number = SPINE_RE
            .captures(&text)
            .and_then(|caps| caps[1].parse().ok());
        record.release_date = extract_release_date(card, &text);
        record.format = FORMAT_RE.find(&text).map(|m| m.as_str().to_string());
        record.price = first_text(card, &SELECTORS.price)
            .or_else(|| PRICE_RE.find(&text).map(|m| m.as_str().to_string()));
        record.description = first_text(card, &SELECTORS.description);
        record.special_features = extract_special_features(card);
        record.cover_art_url = self.extract_cover_art(card);
        record.url = card
            .select(&SELECTORS.product_links)
            .filter_map(|link| link.value().attr("href"))
            .find_map(|href| self.resolve(href));

        Ok(record)
    }

    fn extract_cover_art(&self, card: ElementRef<'_>) -> Option<String> {
        card.select(&SELECTORS.images)
            .filter_map(|img| {
                let attrs = img.value();
                attrs.attr("src").or_else(|| attrs.attr("data-src"))
            })
            .find_map(|src| self.resolve(src))
    }

    /// Resolves against the page URL, keeping only http(s) results
    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        let url = self.base_url.join(href).ok()?;
        matches!(url.scheme(), "http" | "https").then(|| url.to_string())
    }
}

/// Parses a free-text release date into a calendar date
///
/// Accepts "February 20, 2024", "Feb 20, 2024", "February 20 2024", and
/// "02/20/2024", optionally embedded in surrounding text.
///
/// ```
/// use spine_tracker::ingest::parse_release_date;
///
/// let date = parse_release_date("Released Feb 20, 2024").unwrap();
/// assert_eq!(date.to_string(), "2024-02-20");
/// assert!(parse_release_date("Coming soon").is_none());
/// ```
pub fn parse_release_date(text: &str) -> Option<NaiveDate> {
    let caps = DATE_RE.captures(text)?;
    let candidate = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&candidate, format).ok())
}

/// Card containers in document order, outermost only
///
/// Falls back to the parents of product links when no container carries a
/// card class.
fn find_cards(document: &Html) -> Vec<ElementRef<'_>> {
    let cards: Vec<ElementRef<'_>> = document
        .select(&SELECTORS.containers)
        .filter(|element| is_card(*element))
        .filter(|element| !element.ancestors().filter_map(ElementRef::wrap).any(is_card))
        .collect();

    if !cards.is_empty() {
        return cards;
    }

    let mut seen = HashSet::new();
    document
        .select(&SELECTORS.product_links)
        .filter_map(|link| link.parent().and_then(ElementRef::wrap))
        .filter(|parent| seen.insert(parent.id()))
        .collect()
}

fn is_card(element: ElementRef<'_>) -> bool {
    matches!(element.value().name(), "div" | "article" | "li")
        && element
            .value()
            .classes()
            .any(|class| CARD_CLASSES.contains(&class))
}

fn extract_title(card: ElementRef<'_>) -> Option<String> {
    let headings = card.select(&SELECTORS.headings);
    let strong = card.select(&SELECTORS.strong);
    let links = card.select(&SELECTORS.product_links);

    headings
        .chain(strong)
        .chain(links)
        .map(element_text)
        .find(|text| is_title(text))
}

fn is_title(text: &str) -> bool {
    text.chars().count() > 2 && !NON_TITLES.contains(&text)
}

fn extract_director(card: ElementRef<'_>, title: &str) -> Option<String> {
    if let Some(director) = first_text(card, &SELECTORS.director) {
        return Some(director);
    }

    card.select(&SELECTORS.director_candidates)
        .filter(|element| element.id() != card.id() && is_leaf(*element))
        .map(element_text)
        .find(|text| looks_like_name(text) && text != title)
}

fn looks_like_name(text: &str) -> bool {
    let words = text.split_whitespace().count();
    NAME_RE.is_match(text) && (2..=4).contains(&words) && !NOT_A_NAME_RE.is_match(text)
}

fn extract_release_date(card: ElementRef<'_>, text: &str) -> Option<NaiveDate> {
    let from_time = card
        .select(&SELECTORS.time)
        .filter_map(|time| time.value().attr("datetime"))
        .find_map(|value| {
            let day = value.trim().get(..10)?;
            NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
        });

    from_time.or_else(|| {
        let caps = RELEASE_RE.captures(text)?;
        parse_release_date(&caps[1])
    })
}

fn extract_special_features(card: ElementRef<'_>) -> Option<String> {
    let items: Vec<String> = card
        .select(&SELECTORS.feature_items)
        .map(element_text)
        .filter(|item| !item.is_empty())
        .collect();

    if items.is_empty() {
        first_text(card, &SELECTORS.features)
    } else {
        Some(items.join("; "))
    }
}

fn first_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn is_leaf(element: ElementRef<'_>) -> bool {
    !element.children().any(|child| child.value().is_element())
}

/// Text content with whitespace collapsed
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
