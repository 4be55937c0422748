//! Progress reporting from a running cycle.

/// Coarse stage of a backup cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preparing,
    Copying,
    Finishing,
}

/// Receives progress from the synchronizer. Implementations must be cheap;
/// `copied` is called once per extent.
pub trait Progress: Send + Sync {
    fn phase(&self, phase: Phase, message: &str);

    fn log(&self, message: &str);

    fn copied(&self, _bytes_written: u64, _bytes_discarded: u64) {}
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Progress for Silent {
    fn phase(&self, _phase: Phase, _message: &str) {}

    fn log(&self, _message: &str) {}
}
