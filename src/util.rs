use nom::{Parser, bytes::complete::take_while_m_n, combinator::all_consuming};
use rand::Rng;
use scraper::{ElementRef, Selector};
use std::time::Duration;

/// Parse a selector that is known to be valid at compile time.
/// Only use this with literal selectors, since it panics on invalid input.
pub fn sel(selector: &str) -> Selector {
    Selector::parse(selector).unwrap()
}

/// All text nodes of the element, joined and with whitespace collapsed
pub fn element_text(e: &ElementRef) -> String {
    reduce_whitespace(&e.text().collect::<String>())
}

pub fn reduce_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Returns the input if it is exactly four ASCII digits
pub fn parse_year(s: &str) -> Option<&str> {
    all_consuming(take_while_m_n::<_, _, ()>(4, 4, |c: char| c.is_ascii_digit()))
        .parse(s)
        .ok()
        .map(|(_, y)| y)
}

/// Sleep for the given base delay plus a random jitter of up to half of it
pub async fn throttle(base: Duration) {
    if base.is_zero() {
        return;
    }
    let half = (base.as_millis() / 2) as u64;
    let jitter = rand::rng().random_range(0..=half);
    tokio::time::sleep(base + Duration::from_millis(jitter)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn year_must_be_four_digits() {
        assert_eq!(Some("2019"), parse_year("2019"));
        assert_eq!(None, parse_year("19"));
        assert_eq!(None, parse_year("20190"));
        assert_eq!(None, parse_year("MINCETUR"));
        assert_eq!(None, parse_year(""));
    }

    #[test]
    fn text_is_collapsed() {
        let html = Html::parse_fragment("<div><p>  Av. La   Marina <b>123</b>\n</p></div>");
        let p = html.select(&sel("p")).next().unwrap();
        assert_eq!("Av. La Marina 123", element_text(&p));
        assert_eq!("a b", reduce_whitespace(" a\t\n b "));
    }
}
