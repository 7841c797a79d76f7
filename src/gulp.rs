//! Value types shared by the registry and its workers: channel keys, time
//! windows, fetched segments, and the observer event contract.

pub mod event;
pub mod key;
pub mod segment;
pub mod window;

pub use event::{CallbackObserver, GulpEvent, GulpObserver};
pub use key::GulpKey;
pub use segment::Segment;
pub use window::TimeWindow;
