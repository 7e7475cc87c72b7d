//! Flow control - per-direction windows, half states and stream ids.
//!
//! A stream pair is two independent halves. Each half has a [`Window`]
//! bounding unacknowledged bytes in flight and a [`HalfState`] tracking its
//! lifecycle. Ids come from an [`IdSupplier`].

mod ids;
mod state;
mod window;

pub use ids::{IdSupplier, SequentialIds};
pub use state::{Half, HalfState, PairState};
pub use window::{add_padding, FlowError, Window};
