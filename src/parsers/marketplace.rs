//! Marketplace catalog item page parser.
//!
//! Item pages follow `/catalog/catalogitem.page?{S|B|G}=<itemID>`. Price
//! guide values appear in a summary table; the six-month sold counts are the
//! "times sold" cells next to the new/used averages.

use super::{ParsedMarketplaceItem, body_str};
use crate::currency::parse_cents;
use crate::error::ScrapeError;
use regex::Regex;
use std::sync::LazyLock;

static ITEM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span\s+id="item-name-title"[^>]*>([^<]+)</span>"#).unwrap());
static ITEM_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img\s+id="_idImageMain"[^>]*src="([^"]+)""#).unwrap());
static PRICE_CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<td[^>]*>\s*(New|Used)\s*</td>\s*<td[^>]*>\s*([0-9,]+)\s*</td>\s*<td[^>]*>\s*US\s*\$([0-9.,]+)\s*</td>\s*<td[^>]*>\s*US\s*\$([0-9.,]+)\s*</td>"#).unwrap()
});

/// Extract the item record from a catalog page.
///
/// The marketplace serves a dedicated "Item Not Found" page (HTTP 200) for
/// unknown IDs; that is a positive not-found signal, not a parse failure.
pub fn parse_item_page(body: &[u8], url: &str) -> Result<ParsedMarketplaceItem, ScrapeError> {
    let html = body_str(body);

    if html.contains("Item Not Found") || html.contains("No Item(s) were found") {
        return Err(ScrapeError::SetNotFound);
    }

    let (item_type, item_id) = item_ref_from_url(url)?;

    let name = ITEM_NAME
        .captures(&html)
        .map(|c| htmlize::unescape(c[1].trim()).into_owned());
    if name.is_none() {
        return Err(ScrapeError::Parse(format!(
            "no item name on catalog page for {item_id}"
        )));
    }

    let mut item = ParsedMarketplaceItem {
        item_id: item_id.clone(),
        item_type,
        // Set-type items use `<set>-<variant>` ids; the plain set number is
        // the part before the dash.
        set_number: item_id.split('-').next().map(str::to_owned),
        name,
        image_url: ITEM_IMAGE.captures(&html).map(|c| c[1].to_string()),
        ..Default::default()
    };

    for caps in PRICE_CELL.captures_iter(&html) {
        let times_sold: i32 = caps[2].replace(',', "").parse().unwrap_or(0);
        let avg = parse_cents(&caps[3]).ok();
        let current = parse_cents(&caps[4]).ok();
        match &caps[1] {
            "New" => {
                item.times_sold_new = Some(times_sold);
                item.avg_price_new_cents = avg;
                item.current_price_new_cents = current;
            }
            _ => {
                item.times_sold_used = Some(times_sold);
                item.avg_price_used_cents = avg;
                item.current_price_used_cents = current;
            }
        }
    }

    Ok(item)
}

/// Pull `(item_type, item_id)` out of a catalog URL's query string.
pub fn item_ref_from_url(url: &str) -> Result<(String, String), ScrapeError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| ScrapeError::InputInvalid(format!("bad marketplace url '{url}': {e}")))?;

    for (key, value) in parsed.query_pairs() {
        if matches!(key.as_ref(), "S" | "B" | "G" | "M") && !value.is_empty() {
            return Ok((key.into_owned(), value.into_owned()));
        }
    }

    Err(ScrapeError::InputInvalid(format!(
        "no item reference in marketplace url '{url}'"
    )))
}
