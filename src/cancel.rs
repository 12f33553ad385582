//! Cooperative cancellation
//!
//! Waits in this crate are interrupted cooperatively: a token exposes a
//! flag (`is_cancelled`) plus an awaitable completion (`cancelled`), and
//! guards re-check the flag before consuming anything. [`combine`] derives
//! a token from several parents for code that must stop when any one of
//! its owners says so.

pub use tokio_util::sync::CancellationToken;

/// Derive a token that is cancelled as soon as any parent is cancelled.
///
/// Parents remain independent; cancelling the derived token does not
/// propagate back to them. Each parent is watched by a small background
/// task that exits once either side fires.
pub fn combine<I>(parents: I) -> CancellationToken
where
    I: IntoIterator<Item = CancellationToken>,
{
    let combined = CancellationToken::new();

    for parent in parents {
        let derived = combined.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => derived.cancel(),
                _ = derived.cancelled() => {}
            }
        });
    }

    combined
}
