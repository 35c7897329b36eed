//! Background workers

pub mod confirmation_sweeper;

pub use confirmation_sweeper::{ConfirmationSweeper, ConfirmationSweeperConfig, SweepReport};
