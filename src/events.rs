//! Assignment tracking.
//!
//! Every [`Client::get()`](crate::Client::get) produces one [`TrackingEvent`]. The
//! [`EventDispatcher`] decides whether the event is throttled, sent immediately, or queued for the
//! next batch, and hands events to a [`BeaconSink`] for delivery.
mod batch_event_processor;
mod beacon;
mod event;
mod event_dispatcher;
mod throttle_cache;

pub use beacon::{encode_payload, BeaconSink, HttpBeacon};
pub use event::{TrackingEvent, TrackingProperties, EXPERIMENT_BRANCH};
pub use event_dispatcher::{Delivery, EventDispatcher, EventDispatcherConfig};
