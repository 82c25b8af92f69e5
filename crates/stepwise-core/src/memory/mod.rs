//! Sliding-Window Memory (C4)
//!
//! Keeps a bounded history of recent observation outcomes so the tracker
//! can judge consistency without re-deriving it from the whiteboard's
//! single current state.

mod record;
mod window;

pub use record::StateRecord;
pub use window::SlidingWindow;
