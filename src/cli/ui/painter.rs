use owo_colors::{OwoColorize, Style as OwoStyle};

use crate::monitor::ConnectionState;

/// Applies colour and style to terminal text.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    /// Creates a painter with explicit colour control.
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().cyan())
    }

    pub(crate) fn success<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().green())
    }

    pub(crate) fn warning<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().yellow())
    }

    pub(crate) fn danger<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().red())
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().dimmed())
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold())
    }

    /// Colours a connection state by how healthy it is.
    pub(crate) fn state(&self, state: ConnectionState) -> String {
        let label = state.to_string();
        match state {
            ConnectionState::Connected => self.success(label),
            ConnectionState::Scanning | ConnectionState::Connecting => self.value(label),
            ConnectionState::Disconnected => self.warning(label),
            ConnectionState::Error => self.danger(label),
            ConnectionState::Idle => self.muted(label),
        }
    }

    fn paint(&self, text: &str, style: OwoStyle) -> String {
        if self.use_colour {
            format!("{}", text.style(style))
        } else {
            text.to_string()
        }
    }
}
