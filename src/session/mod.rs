//! Protocol session lifecycle.
//!
//! A pure state machine: the client feeds it every frame it sends and
//! receives, and it answers whether the ordering is legal.

mod state;

pub use state::{transition, Event, Outcome, Session, SessionState, Step};
