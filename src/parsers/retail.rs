//! Retail listing parser for user-pasted HTML.
//!
//! Users paste a listing page from the retail site along with its source
//! URL; product cards carry a data attribute with the product id plus name,
//! price, and a "N sold" counter.

use super::{ParsedRetailListing, body_str};
use crate::currency::parse_cents;
use crate::error::ScrapeError;
use regex::Regex;
use std::sync::LazyLock;

static PRODUCT_CARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<div\s+class="product-card"\s+data-product-id="([^"]+)">(.*?)</div>"#)
        .unwrap()
});
static CARD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span class="name">([^<]+)</span>"#).unwrap());
static CARD_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span class="price">\$([0-9.,]+)</span>"#).unwrap());
static CARD_SOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span class="sold">([0-9.,]+)k?\s*sold</span>"#).unwrap());

/// Extract all product cards from a pasted listing page.
pub fn parse_listing_html(body: &[u8], url: &str) -> Result<Vec<ParsedRetailListing>, ScrapeError> {
    let html = body_str(body);

    let mut listings = Vec::new();
    for caps in PRODUCT_CARD.captures_iter(&html) {
        let card = &caps[2];
        listings.push(ParsedRetailListing {
            product_id: caps[1].to_string(),
            name: CARD_NAME
                .captures(card)
                .map(|c| htmlize::unescape(c[1].trim()).into_owned()),
            price_cents: CARD_PRICE.captures(card).and_then(|c| parse_cents(&c[1]).ok()),
            sold_count: CARD_SOLD
                .captures(card)
                .and_then(|c| c[1].replace(',', "").parse().ok()),
        });
    }

    if listings.is_empty() {
        return Err(ScrapeError::Parse(format!(
            "no product cards found in pasted page from {url}"
        )));
    }

    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <div class="product-card" data-product-id="8741231">
          <span class="name">LEGO 75192 Millennium Falcon</span>
          <span class="price">$789.00</span>
          <span class="sold">1,204 sold</span>
        </div>
        <div class="product-card" data-product-id="8741232">
          <span class="name">LEGO 10316 Rivendell</span>
          <span class="price">$420.50</span>
        </div>"#;

    #[test]
    fn parses_product_cards() {
        let listings =
            parse_listing_html(PAGE.as_bytes(), "https://retail.example.com/shop/lego").unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].product_id, "8741231");
        assert_eq!(listings[0].price_cents, Some(78_900));
        assert_eq!(listings[0].sold_count, Some(1204));
        assert_eq!(listings[1].sold_count, None);
    }

    #[test]
    fn page_without_cards_is_parse_error() {
        let err = parse_listing_html(b"<html>nothing here</html>", "u").unwrap_err();
        assert!(matches!(err, ScrapeError::Parse(_)));
    }
}
