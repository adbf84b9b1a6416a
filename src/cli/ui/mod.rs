mod device_view;
mod gatt_view;
mod listen_view;
mod painter;
mod table;

pub(crate) use self::device_view::{DeviceLineView, DeviceTableView};
pub(crate) use self::gatt_view::GattOutcomeView;
pub(crate) use self::listen_view::{ListenNotificationView, ListenReadyView, ListenSummaryView};
pub(crate) use self::painter::Painter;
