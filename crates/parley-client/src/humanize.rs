use chrono::{DateTime, Utc};

const MINUTES_IN_DAY: i64 = 1_440;
const MINUTES_IN_ALMOST_TWO_DAYS: i64 = 2_520;
const MINUTES_IN_MONTH: i64 = 43_200;
const MINUTES_IN_TWO_MONTHS: i64 = 86_400;

/// Human distance between `then` and `now`: "5 minutes ago", "in about 2 hours".
pub fn format_distance(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    let minutes = (seconds.abs() as f64 / 60.0).round() as i64;
    let phrase = distance_phrase(minutes);

    if seconds < 0 {
        format!("in {}", phrase)
    } else {
        format!("{} ago", phrase)
    }
}

fn distance_phrase(minutes: i64) -> String {
    match minutes {
        0 => "less than a minute".to_string(),
        m if m < 45 => count(m, "minute"),
        m if m < 90 => "about 1 hour".to_string(),
        m if m < MINUTES_IN_DAY => format!("about {}", count(div_round(m, 60), "hour")),
        m if m < MINUTES_IN_ALMOST_TWO_DAYS => "1 day".to_string(),
        m if m < MINUTES_IN_MONTH => count(div_round(m, MINUTES_IN_DAY), "day"),
        m if m < MINUTES_IN_TWO_MONTHS => {
            format!("about {}", count(div_round(m, MINUTES_IN_MONTH), "month"))
        }
        m => {
            let months = m / MINUTES_IN_MONTH;
            if months < 12 {
                return count(div_round(m, MINUTES_IN_MONTH), "month");
            }
            let years = months / 12;
            match months % 12 {
                0..=2 => format!("about {}", count(years, "year")),
                3..=8 => format!("over {}", count(years, "year")),
                _ => format!("almost {}", count(years + 1, "year")),
            }
        }
    }
}

fn div_round(value: i64, unit: i64) -> i64 {
    (value as f64 / unit as f64).round() as i64
}

fn count(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}
