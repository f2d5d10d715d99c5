use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// "3 days ago" style age of `datetime`.
pub fn format_relative_time(datetime: OffsetDateTime) -> String {
    format_relative_to(OffsetDateTime::now_utc(), datetime)
}

pub fn format_relative_to(now: OffsetDateTime, datetime: OffsetDateTime) -> String {
    let total_seconds = (now - datetime).whole_seconds();

    let (n, unit) = if total_seconds < 60 {
        return "just now".to_string();
    } else if total_seconds < 3600 {
        (total_seconds / 60, "minute")
    } else if total_seconds < 86400 {
        (total_seconds / 3600, "hour")
    } else if total_seconds < 2_592_000 {
        (total_seconds / 86400, "day")
    } else if total_seconds < 31_536_000 {
        (total_seconds / 2_592_000, "month")
    } else {
        (total_seconds / 31_536_000, "year")
    };
    format!("{n} {unit}{} ago", if n == 1 { "" } else { "s" })
}

pub fn format_timestamp(datetime: OffsetDateTime) -> String {
    datetime.format(&Rfc3339).unwrap_or_else(|_| "unknown".to_string())
}

/// `0x1234…abcd` for table output.
pub fn short_address(address: &str) -> String {
    if address.len() <= 12 {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}
