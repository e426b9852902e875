//! Event and listener plumbing shared by the engines and the façade

pub mod event;
pub mod listener;

pub use event::{EventDispatcher, EventSink, MessageDirection, PrinterEvent};
pub use listener::{deliver, PrinterListener, PrinterListenerHandle};
