use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Resolves the date typed at the confirmation prompt or after `/plan`.
/// Accepts `today`, `tomorrow`, `yesterday`, `+N`/`-N` days (`d`/`w`
/// suffixes allowed), weekday names (`fri`, `next fri`) and `YYYY-MM-DD`.
pub(crate) fn parse_target_date(input: &str, base: NaiveDate) -> Option<NaiveDate> {
    let trimmed = input.trim().to_lowercase();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(&trimmed, "%Y-%m-%d") {
        return Some(date);
    }

    match trimmed.as_str() {
        "today" | "tod" => return Some(base),
        "tomorrow" | "tmr" | "tom" => return Some(base + Duration::days(1)),
        "yesterday" => return Some(base - Duration::days(1)),
        _ => {}
    }

    parse_offset(&trimmed, base).or_else(|| parse_weekday_input(&trimmed, base))
}

/// "Today", "Tomorrow", or e.g. "Fri 14 Mar 2025".
pub(crate) fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if date == today + Duration::days(1) {
        "Tomorrow".to_string()
    } else if date == today - Duration::days(1) {
        "Yesterday".to_string()
    } else {
        date.format("%a %d %b %Y").to_string()
    }
}

fn parse_offset(input: &str, base: NaiveDate) -> Option<NaiveDate> {
    let (sign, rest) = match input.as_bytes().first()? {
        b'+' => (1i64, &input[1..]),
        b'-' => (-1i64, &input[1..]),
        _ => return None,
    };
    let (digits, unit) = match rest.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => rest.split_at(idx),
        None => (rest, ""),
    };
    if digits.is_empty() || digits.len() > 4 {
        return None;
    }
    let qty: i64 = digits.parse().ok()?;
    let days = match unit {
        "" | "d" => qty,
        "w" => qty * 7,
        _ => return None,
    };
    base.checked_add_signed(Duration::days(sign * days))
}

fn parse_weekday_input(input: &str, base: NaiveDate) -> Option<NaiveDate> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts.as_slice() {
        [day] => Some(next_weekday(base, parse_weekday(day)?, false)),
        ["next", day] => Some(next_weekday(base, parse_weekday(day)?, true)),
        _ => None,
    }
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    const NAMES: [(&str, Weekday); 7] = [
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sunday", Weekday::Sun),
    ];
    if token.len() < 3 {
        return None;
    }
    NAMES
        .iter()
        .find(|(name, _)| name.starts_with(token))
        .map(|(_, weekday)| *weekday)
}

/// Same weekday as `base` means today unless `force_next`.
fn next_weekday(base: NaiveDate, weekday: Weekday, force_next: bool) -> NaiveDate {
    let base_num = base.weekday().num_days_from_monday() as i64;
    let target_num = weekday.num_days_from_monday() as i64;
    let mut delta = (target_num - base_num + 7) % 7;
    if force_next && delta == 0 {
        delta = 7;
    }
    base + Duration::days(delta)
}
