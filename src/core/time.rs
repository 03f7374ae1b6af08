use time::{macros::format_description, Date, OffsetDateTime};

/// Calendar date as the exam API expects it in `examDate`.
pub(crate) fn format_exam_date(value: Date) -> String {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| value.to_string())
}

pub(crate) fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}
