mod device_view;
mod listen_view;
mod painter;
mod table;

pub(crate) use self::device_view::DeviceView;
pub(crate) use self::listen_view::{ListenReadyView, ListenSummaryView, ReadingView, StatusView};
pub(crate) use self::painter::Painter;
