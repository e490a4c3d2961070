//! A one-shot, state-retaining signal used everywhere a task needs to
//! cooperatively stop, or report that it has finished: gateway accept
//! loops, CPN workers, the Server Gateway, the Connection Pool
//! dispatcher, and per-tunnel completion tracking.
//!
//! `tokio::sync::Notify::notify_waiters()` only wakes tasks that are
//! *currently* polling `.notified()` — it stores no permit for a later
//! call. Every consumer here spends long stretches not polling that
//! future (blocked in a channel send, a socket read, or a backend dial),
//! so a `Notify`-based signal sent at the wrong moment is lost forever
//! and the waiting task hangs on its next, fresh `.notified()` call. A
//! `watch` channel retains its last value, so a receiver that only
//! checks in later still observes a signal sent while it was busy.
use tokio::sync::watch;

pub type Signal = watch::Sender<bool>;
pub type Observer = watch::Receiver<bool>;

pub fn signal_pair() -> (Signal, Observer) {
    watch::channel(false)
}
