/// Formats an optional RSSI for terminal output.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    match rssi {
        Some(value) => format!("{value} dBm"),
        None => "-".to_string(),
    }
}

/// Formats the sensor-contact flag of a reading.
pub(crate) fn format_contact(contact: Option<bool>) -> &'static str {
    match contact {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    }
}

/// Formats RR intervals in milliseconds, rounded to whole milliseconds.
pub(crate) fn format_rr_intervals(intervals_ms: impl IntoIterator<Item = f64>) -> String {
    let rendered: Vec<String> = intervals_ms
        .into_iter()
        .map(|interval| format!("{interval:.0}"))
        .collect();
    if rendered.is_empty() {
        return "-".to_string();
    }
    format!("{}ms", rendered.join("/"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn format_rssi_handles_unknown() {
        assert_eq!("-", format_rssi(None));
    }

    #[test]
    fn format_rssi_appends_unit() {
        assert_eq!("-43 dBm", format_rssi(Some(-43)));
    }

    #[rstest]
    #[case::detected(Some(true), "yes")]
    #[case::lost(Some(false), "no")]
    #[case::unsupported(None, "-")]
    fn format_contact_labels(#[case] contact: Option<bool>, #[case] expected: &str) {
        assert_eq!(expected, format_contact(contact));
    }

    #[test]
    fn format_rr_intervals_rounds_and_joins() {
        assert_eq!("1000/813ms", format_rr_intervals([1000.0, 812.5078125]));
    }

    #[test]
    fn format_rr_intervals_handles_empty() {
        assert_eq!("-", format_rr_intervals(Vec::new()));
    }
}
