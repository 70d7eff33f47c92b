use chrono::{Datelike, NaiveDate};

/// Derived metrics for one listing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Derived {
    pub age: Option<i32>,
    pub age_in_months: Option<i32>,
    pub mechanical_age: Option<f64>,
    pub mechanical_age_real_age_ratio: Option<f64>,
}

/// The stored fields enrichment reads.
#[derive(Debug, Clone, Copy)]
pub struct EnrichInput<'a> {
    pub year: Option<i32>,
    pub mileage: Option<i64>,
    pub date_on_road: Option<&'a str>,
}

pub fn enrich(input: EnrichInput<'_>, today: NaiveDate, annual_km: f64) -> Derived {
    let age = input.year.map(|y| (today.year() - y).max(0));
    let age_in_months = input
        .date_on_road
        .and_then(parse_road_date)
        .and_then(|d| months_between(d, today));
    let mechanical_age = input
        .mileage
        .filter(|_| annual_km > 0.0)
        .map(|km| round2(km as f64 / annual_km));
    let mechanical_age_real_age_ratio = match (mechanical_age, age) {
        (Some(mech), Some(a)) if a > 0 => Some(round2(mech / a as f64)),
        _ => None,
    };

    Derived {
        age,
        age_in_months,
        mechanical_age,
        mechanical_age_real_age_ratio,
    }
}

/// Accepts `MM/YYYY`, `YYYY-MM` and `YYYY-MM-DD`. Month-only forms resolve to the 1st.
pub fn parse_road_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    let (year, month) = if let Some((m, y)) = raw.split_once('/') {
        (y.trim().parse::<i32>().ok()?, m.trim().parse::<u32>().ok()?)
    } else if let Some((y, m)) = raw.split_once('-') {
        (y.trim().parse::<i32>().ok()?, m.trim().parse::<u32>().ok()?)
    } else {
        return None;
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Whole calendar months from `from` to `to`; `None` when `from` is later.
fn months_between(from: NaiveDate, to: NaiveDate) -> Option<i32> {
    if from > to {
        return None;
    }
    let mut months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    if to.day() < from.day() {
        months -= 1;
    }
    Some(months.max(0))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn six_year_old_car_at_average_mileage() {
        let d = enrich(
            EnrichInput {
                year: Some(2018),
                mileage: Some(90_000),
                date_on_road: Some("2018-03-01"),
            },
            day(2024, 3, 1),
            15_000.0,
        );
        assert_eq!(d.age, Some(6));
        assert_eq!(d.age_in_months, Some(72));
        assert_eq!(d.mechanical_age, Some(6.0));
        assert_eq!(d.mechanical_age_real_age_ratio, Some(1.0));
    }

    #[test]
    fn ratio_is_null_for_current_year() {
        let d = enrich(
            EnrichInput {
                year: Some(2024),
                mileage: Some(5_000),
                date_on_road: Some("01/2024"),
            },
            day(2024, 6, 15),
            15_000.0,
        );
        assert_eq!(d.age, Some(0));
        assert_eq!(d.age_in_months, Some(5));
        assert_eq!(d.mechanical_age, Some(0.33));
        assert_eq!(d.mechanical_age_real_age_ratio, None);
    }

    #[test]
    fn ratio_divides_mechanical_by_real_age() {
        let d = enrich(
            EnrichInput {
                year: Some(2020),
                mileage: Some(120_000),
                date_on_road: None,
            },
            day(2024, 1, 1),
            15_000.0,
        );
        assert_eq!(d.mechanical_age, Some(8.0));
        assert_eq!(d.mechanical_age_real_age_ratio, Some(2.0));
        assert_eq!(d.age_in_months, None);
    }

    #[test]
    fn missing_mileage_leaves_mechanical_fields_empty() {
        let d = enrich(
            EnrichInput {
                year: Some(2015),
                mileage: None,
                date_on_road: Some("2015-07"),
            },
            day(2024, 7, 1),
            15_000.0,
        );
        assert_eq!(d.age, Some(9));
        assert_eq!(d.age_in_months, Some(108));
        assert_eq!(d.mechanical_age, None);
        assert_eq!(d.mechanical_age_real_age_ratio, None);
    }

    #[test]
    fn future_year_clamps_age() {
        let d = enrich(
            EnrichInput {
                year: Some(2026),
                mileage: Some(10),
                date_on_road: Some("05/2026"),
            },
            day(2025, 1, 1),
            15_000.0,
        );
        assert_eq!(d.age, Some(0));
        assert_eq!(d.age_in_months, None);
    }

    #[test]
    fn road_date_formats() {
        assert_eq!(parse_road_date("03/2019"), Some(day(2019, 3, 1)));
        assert_eq!(parse_road_date("2019-03"), Some(day(2019, 3, 1)));
        assert_eq!(parse_road_date("2019-03-17"), Some(day(2019, 3, 17)));
        assert_eq!(parse_road_date("13/2019"), None);
        assert_eq!(parse_road_date("soon"), None);
    }

    #[test]
    fn partial_month_does_not_count() {
        assert_eq!(months_between(day(2020, 1, 20), day(2020, 3, 19)), Some(1));
        assert_eq!(months_between(day(2020, 1, 20), day(2020, 3, 20)), Some(2));
    }
}
