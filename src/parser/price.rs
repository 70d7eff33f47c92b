use std::sync::LazyLock;

use regex::Regex;

static JSON_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""price":(\d+)"#).unwrap());

/// Asking price from the price element's text, falling back to the page's
/// embedded `"price":N`.
///
/// The price element often also carries a monthly-payment figure, so when it
/// holds several numbers the 5+ digit ones win.
pub fn extract_price(price_text: Option<&str>, html: &str, age: Option<i32>) -> Option<i64> {
    price_text
        .and_then(|text| price_from_text(text, age))
        .or_else(|| price_from_json(html))
}

fn price_from_text(text: &str, age: Option<i32>) -> Option<i64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || c.is_whitespace())
        .collect();
    let values: Vec<i64> = cleaned
        .split_whitespace()
        .filter_map(|n| n.parse().ok())
        .collect();

    match values.as_slice() {
        [] => None,
        [single] => is_valid_price_for_age(*single, age).then_some(*single),
        _ => {
            let car_prices: Vec<i64> = values.iter().copied().filter(|p| digits(*p) >= 5).collect();
            car_prices
                .iter()
                .copied()
                .filter(|p| is_valid_price_for_age(*p, age))
                .max()
                .or_else(|| car_prices.iter().copied().max())
                .or_else(|| {
                    values
                        .iter()
                        .copied()
                        .filter(|p| is_valid_price_for_age(*p, age))
                        .max()
                })
        }
    }
}

/// Whether `price` is plausible as a full asking price for a car this old.
pub fn is_valid_price_for_age(price: i64, age: Option<i32>) -> bool {
    let Some(age) = age else {
        return true;
    };
    // Short figures on newer cars are monthly payments.
    if age < 10 && digits(price) <= 4 {
        return false;
    }
    if age >= 20 && price < 10_000 {
        return true;
    }
    (1_000..=2_000_000).contains(&price)
}

/// First `"price":N` in the raw page, if it is in a realistic range.
pub fn price_from_json(html: &str) -> Option<i64> {
    let cap = JSON_PRICE_RE.captures(html)?;
    let value: i64 = cap[1].parse().ok()?;
    (10_000..=1_000_000).contains(&value).then_some(value)
}

fn digits(n: i64) -> usize {
    n.unsigned_abs().to_string().len()
}
