use chrono::{DateTime, FixedOffset, Utc};

/// Timestamps written to the spreadsheet are in Pakistan Standard Time (UTC+5),
/// the platform's home timezone.
const PKT_OFFSET_SECS: i32 = 5 * 3600;

pub fn pkt() -> FixedOffset {
    FixedOffset::east_opt(PKT_OFFSET_SECS).expect("UTC+5 is a valid offset")
}

pub fn now_pkt() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&pkt())
}

/// `15-Oct-26 10:04 AM`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&pkt()).format("%d-%b-%y %I:%M %p").to_string()
}

/// `15-Oct-26`
pub fn format_date(at: DateTime<Utc>) -> String {
    at.with_timezone(&pkt()).format("%d-%b-%y").to_string()
}

/// Presence log cells: `2026-10-15`, `10:04:00`, and the combined stamp.
pub fn presence_cells(at: DateTime<Utc>) -> [String; 3] {
    let local = at.with_timezone(&pkt());
    [
        local.format("%Y-%m-%d").to_string(),
        local.format("%H:%M:%S").to_string(),
        local.format("%d-%b-%y %I:%M %p").to_string(),
    ]
}
