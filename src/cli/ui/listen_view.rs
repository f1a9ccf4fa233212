use std::fmt::{self, Display, Formatter};

use crate::cli::listen::{ListenStopReason, ListenSummary};
use crate::hw::DeviceHandle;
use crate::measurement::HeartRateReading;
use crate::monitor::ConnectionStatus;
use crate::protocol::{self, EndpointId};
use crate::utils::{format_contact, format_rr_intervals};

use super::device_view::DeviceView;
use super::painter::Painter;
use super::table::Table;

/// Renders the listen-session readiness output.
pub(crate) struct ListenReadyView<'a> {
    device: &'a DeviceHandle,
    painter: &'a Painter,
}

impl<'a> ListenReadyView<'a> {
    pub(crate) fn new(device: &'a DeviceHandle, painter: &'a Painter) -> Self {
        Self { device, painter }
    }
}

impl Display for ListenReadyView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let endpoint = protocol::endpoint_metadata(EndpointId::HeartRateMeasurement);
        let session_table = Table::key_value(
            self.painter,
            vec![(
                "listening_on",
                format!(
                    "{} {}",
                    self.painter.value(endpoint.uuid().to_string()),
                    self.painter.muted(format!("({})", endpoint.name()))
                ),
            )],
        );

        let device = DeviceView::new(self.device, self.painter);

        write!(f, "{}", self.painter.heading("Connected sensor:"))?;
        write!(f, "\n{device}")?;
        writeln!(f)?;
        write!(f, "\n{}", self.painter.heading("Listen session:"))?;
        write!(f, "\n{session_table}")
    }
}

/// Renders a single reading line.
pub(crate) struct ReadingView<'a> {
    index: usize,
    reading: &'a HeartRateReading,
    painter: &'a Painter,
}

impl<'a> ReadingView<'a> {
    pub(crate) fn new(index: usize, reading: &'a HeartRateReading, painter: &'a Painter) -> Self {
        Self {
            index,
            reading,
            painter,
        }
    }
}

impl Display for ReadingView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index_label = self.painter.muted(format!("[{:04}]", self.index));
        let bpm = self.painter.value(format!("{:>3} bpm", self.reading.bpm()));
        let contact = self.painter.muted(format!(
            "contact={}",
            format_contact(self.reading.sensor_contact())
        ));
        let rr = self.painter.muted(format!(
            "rr={}",
            format_rr_intervals(self.reading.rr_intervals_ms())
        ));
        write!(f, "{index_label} {bpm} {contact} {rr}")?;
        if let Some(energy) = self.reading.energy_expended() {
            write!(f, " {}", self.painter.muted(format!("energy={energy}kJ")))?;
        }
        Ok(())
    }
}

/// Renders a connection status change.
pub(crate) struct StatusView<'a> {
    status: &'a ConnectionStatus,
    painter: &'a Painter,
}

impl<'a> StatusView<'a> {
    pub(crate) fn new(status: &'a ConnectionStatus, painter: &'a Painter) -> Self {
        Self { status, painter }
    }
}

impl Display for StatusView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.painter.heading("State:"),
            self.painter.state(self.status.state())
        )?;
        if self.status.is_reconnecting() {
            write!(
                f,
                " {}",
                self.painter
                    .warning(format!("(reconnect attempt {})", self.status.attempt()))
            )?;
        }
        if let Some(error) = self.status.error() {
            write!(
                f,
                "\n  {} {}\n  {} {}",
                self.painter.danger(error.kind().to_string()),
                error.message(),
                self.painter.muted("hint:"),
                error.remedy()
            )?;
        }
        Ok(())
    }
}

/// Renders the listen session summary.
pub(crate) struct ListenSummaryView<'a> {
    summary: &'a ListenSummary,
    painter: &'a Painter,
}

impl<'a> ListenSummaryView<'a> {
    pub(crate) fn new(summary: &'a ListenSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for ListenSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stop_reason = self.summary.stop_reason().to_string();
        let stop_reason = match self.summary.stop_reason() {
            ListenStopReason::ReachedLimit(_) => self.painter.success(stop_reason),
            ListenStopReason::Interrupted => self.painter.warning(stop_reason),
            ListenStopReason::Failed(_) => self.painter.danger(stop_reason),
        };
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            stop_reason,
            self.painter.value(format!(
                "- received {} reading(s), {} reconnect(s)",
                self.summary.received_readings(),
                self.summary.reconnects()
            ))
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::error::HeartRateError;
    use crate::measurement::MeasurementDecoder;
    use crate::monitor::{ConnectionStateTracker, StateEvent};

    use super::*;

    fn device() -> DeviceHandle {
        DeviceHandle::new("AA:BB:CC".into(), Some("Polar H10 A1B2".into()), Some(-43))
    }

    #[test]
    fn ready_view_names_device_and_characteristic() {
        let device = device();
        let painter = Painter::new(false);

        let rendered = ListenReadyView::new(&device, &painter).to_string();

        assert!(rendered.starts_with("Connected sensor:"), "{rendered}");
        assert!(rendered.contains("Polar H10 A1B2"));
        assert!(rendered.contains("00002a37-0000-1000-8000-00805f9b34fb"));
        assert!(rendered.contains("(Heart Rate Measurement)"));
    }

    #[rstest]
    #[case::bpm_only(&[0x00, 0x48], "[0007]  72 bpm contact=- rr=-")]
    #[case::contact_and_rr(&[0x16, 0x48, 0x00, 0x04], "[0007]  72 bpm contact=yes rr=1000ms")]
    #[case::energy(&[0x08, 0x48, 0x10, 0x00], "[0007]  72 bpm contact=- rr=- energy=16kJ")]
    fn reading_view_renders_line(#[case] payload: &[u8], #[case] expected: &str) {
        let reading = MeasurementDecoder::decode(payload).expect("payload should decode");
        let painter = Painter::new(false);

        assert_eq!(expected, ReadingView::new(7, &reading, &painter).to_string());
    }

    #[test]
    fn status_view_shows_reconnect_attempt() {
        let painter = Painter::new(false);
        let tracker = ConnectionStateTracker::new();
        tracker.apply(StateEvent::ConnectStarted);
        tracker.apply(StateEvent::LinkLost);
        tracker.set_reconnecting(true, 3);

        let rendered = StatusView::new(&tracker.status(), &painter).to_string();

        assert_eq!("State: disconnected (reconnect attempt 3)", rendered);
    }

    #[test]
    fn status_view_shows_error_with_remedy() {
        let painter = Painter::new(false);
        let tracker = ConnectionStateTracker::new();
        tracker.fail(&HeartRateError::NotEnabled);

        let rendered = StatusView::new(&tracker.status(), &painter).to_string();

        assert_eq!(
            "State: error\n  not_enabled the Bluetooth adapter is powered off\n  hint: enable Bluetooth in your system settings",
            rendered
        );
    }

    #[rstest]
    #[case::reached_limit(ListenStopReason::ReachedLimit(10), "reached limit of 10 reading(s)")]
    #[case::interrupted(ListenStopReason::Interrupted, "interrupted")]
    #[case::failed(ListenStopReason::Failed("link lost".into()), "failed: link lost")]
    fn summary_renders_stop_reason(#[case] stop_reason: ListenStopReason, #[case] expected: &str) {
        let summary = ListenSummary::new(device(), 5, 1, stop_reason);
        let painter = Painter::new(false);

        assert_eq!(
            format!("Stopped: {expected} - received 5 reading(s), 1 reconnect(s)"),
            ListenSummaryView::new(&summary, &painter).to_string()
        );
    }
}
