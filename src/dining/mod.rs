//! Philosophers who need two forks to eat.
//!
//! A [`DiningTable`] seats philosophers between [`Fork`]s and lets them eat
//! from a shared [`Bowl`] until it is empty. Whether that ever happens
//! depends on the seating and the [`Strategy`]:
//!
//! - seats whose (first, second) forks form a cycle deadlock under
//!   [`Strategy::AsAssigned`];
//! - [`Strategy::GlobalOrder`] always takes the lower fork first, so no
//!   cycle can form;
//! - [`Strategy::BackOff`] avoids blocking on the second fork but can spin
//!   politely without progress.
//!
//! A run that exceeds its patience is stopped and reported as
//! [`Outcome::Stalled`], naming the circular wait if there is one.

pub mod fork;
pub mod table;
pub mod wait_graph;
pub mod worker;

pub use fork::{Fairness, Fork, ForkGuard};
pub use table::{DiningReport, DiningTable, Outcome, TableBuilder};
pub use worker::{Bowl, Seat, Strategy, WorkerState};
