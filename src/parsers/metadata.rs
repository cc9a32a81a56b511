//! Metadata site parsers: search results page and product page.
//!
//! The metadata site is a two-hop source. A search for a set number yields
//! either product links or an empty result list; absence from the search
//! results is the site's not-found signal.

use super::{ParsedMetadataSet, body_str};
use crate::currency::parse_cents;
use crate::error::ScrapeError;
use regex::Regex;
use std::sync::LazyLock;

static PRODUCT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a\s+class="product-link"\s+href="([^"]+)""#).unwrap());
static PRODUCT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<h1\s+class="product-title">([^<]+)</h1>"#).unwrap());
static SPEC_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<dt>(Year|Pieces|Minifigs|RRP)</dt>\s*<dd>([^<]+)</dd>"#).unwrap()
});
static PRODUCT_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img\s+class="product-image"[^>]*src="([^"]+)""#).unwrap());

/// Extract the concrete product URL from a search results page.
///
/// Zero product links means the site does not know the set: a terminal
/// not-found outcome, never retried.
pub fn parse_search_results(body: &[u8], url: &str) -> Result<String, ScrapeError> {
    let html = body_str(body);

    match PRODUCT_LINK.captures(&html) {
        Some(caps) => {
            let href = &caps[1];
            let base = url::Url::parse(url)
                .map_err(|e| ScrapeError::InputInvalid(format!("bad search url '{url}': {e}")))?;
            let absolute = base
                .join(href)
                .map_err(|e| ScrapeError::Parse(format!("unresolvable product href '{href}': {e}")))?;
            Ok(absolute.to_string())
        }
        None => Err(ScrapeError::SetNotFound),
    }
}

/// Extract the metadata record from a product page.
pub fn parse_product_page(
    body: &[u8],
    url: &str,
    set_number: &str,
) -> Result<ParsedMetadataSet, ScrapeError> {
    let html = body_str(body);

    let name = PRODUCT_NAME
        .captures(&html)
        .map(|c| htmlize::unescape(c[1].trim()).into_owned())
        .ok_or_else(|| ScrapeError::Parse(format!("no product title on {url}")))?;

    let mut set = ParsedMetadataSet {
        set_number: set_number.to_string(),
        name: Some(name),
        product_url: Some(url.to_string()),
        image_url: PRODUCT_IMAGE.captures(&html).map(|c| c[1].to_string()),
        ..Default::default()
    };

    for caps in SPEC_FIELD.captures_iter(&html) {
        let value = caps[2].trim();
        match &caps[1] {
            "Year" => set.year_released = value.parse().ok(),
            "Pieces" => set.pieces = value.replace(',', "").parse().ok(),
            "Minifigs" => set.minifigs = value.parse().ok(),
            "RRP" => set.rrp_cents = parse_cents(value).ok(),
            _ => {}
        }
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_yields_absolute_product_url() {
        let body = br#"<div><a class="product-link" href="/sets/75192-millennium-falcon">x</a></div>"#;
        let url = parse_search_results(body, "https://metadata.example.com/search?q=75192").unwrap();
        assert_eq!(url, "https://metadata.example.com/sets/75192-millennium-falcon");
    }

    #[test]
    fn empty_search_is_not_found() {
        let err = parse_search_results(
            b"<div class='results'></div>",
            "https://metadata.example.com/search?q=77243",
        )
        .unwrap_err();
        assert!(matches!(err, ScrapeError::SetNotFound));
    }

    #[test]
    fn parses_product_specs() {
        let body = br#"
            <h1 class="product-title">Millennium Falcon</h1>
            <img class="product-image" src="https://img.example.com/75192.jpg">
            <dl>
            <dt>Year</dt><dd>2017</dd>
            <dt>Pieces</dt><dd>7,541</dd>
            <dt>Minifigs</dt><dd>8</dd>
            <dt>RRP</dt><dd>$849.99</dd>
            </dl>"#;
        let set = parse_product_page(body, "https://metadata.example.com/sets/75192", "75192")
            .unwrap();
        assert_eq!(set.name.as_deref(), Some("Millennium Falcon"));
        assert_eq!(set.year_released, Some(2017));
        assert_eq!(set.pieces, Some(7541));
        assert_eq!(set.minifigs, Some(8));
        assert_eq!(set.rrp_cents, Some(84_999));
    }

    #[test]
    fn product_page_without_title_is_parse_error() {
        let err = parse_product_page(b"<html></html>", "https://metadata.example.com/x", "75192")
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Parse(_)));
    }
}
