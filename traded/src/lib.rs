//! Link trade daemon - session orchestration.
//!
//! Workers each drive one remote console through the trade portal. The
//! [`queue::Dispatcher`] hands out requests by priority tier, a
//! [`session::TradeSession`] negotiates one exchange at a time, and shared
//! services (templates, reputation, barrier, counters, archive, events)
//! are reached through [`session::TradeServices`].

#![forbid(unsafe_code)]

pub mod archive;
pub mod barrier;
pub mod counters;
pub mod events;
pub mod library;
pub mod queue;
pub mod reputation;
pub mod retry;
pub mod session;
pub mod swap;
pub mod title;
pub mod worker;
