//! Per-channel inbound mailbox
//!
//! A bounded FIFO queue between the connection's reader task and one
//! channel consumer. Delivery waits for a free slot when the queue is
//! full; taking a value releases the slot. `take_if` makes the guard
//! check and the pop a single atomic step, which is what lets a wait
//! that loses its race leave a concurrently arriving value queued for
//! the next caller.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

pub(crate) struct Mailbox {
    queue: Mutex<VecDeque<Value>>,
    readable: Notify,
    slots: Semaphore,
    closed: CancellationToken,
}

impl Mailbox {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Notify::new(),
            slots: Semaphore::new(capacity),
            closed: CancellationToken::new(),
        }
    }

    /// Queue a value, waiting for a free slot when the mailbox is full.
    ///
    /// Returns `false` if the mailbox closed before a slot opened.
    pub(crate) async fn deliver(&self, value: Value) -> bool {
        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return false,
            permit = self.slots.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };
        // The slot stays taken until a consumer pops the value
        permit.forget();

        self.queue.lock().unwrap().push_back(value);
        self.readable.notify_one();
        true
    }

    /// Pop the oldest value without blocking.
    pub(crate) fn try_take(&self) -> Option<Value> {
        if self.is_closed() {
            return None;
        }

        let value = self.queue.lock().unwrap().pop_front();
        if value.is_some() {
            self.slots.add_permits(1);
        }
        value
    }

    /// Pop the oldest value only if `guard` holds, atomically with the
    /// check.
    ///
    /// When the guard declines and a value is queued, the readable signal
    /// is re-armed so another consumer can claim it.
    pub(crate) fn take_if(&self, guard: impl FnOnce() -> bool) -> Option<Value> {
        if self.is_closed() {
            return None;
        }

        let mut queue = self.queue.lock().unwrap();
        if !guard() {
            if !queue.is_empty() {
                self.readable.notify_one();
            }
            return None;
        }

        let value = queue.pop_front();
        if value.is_some() {
            self.slots.add_permits(1);
        }
        value
    }

    /// Wait until a value is queued or the mailbox closes.
    pub(crate) async fn readable(&self) {
        loop {
            let mut notified = pin!(self.readable.notified());
            notified.as_mut().enable();

            if !self.is_empty() || self.is_closed() {
                return;
            }

            // Re-checked on wakeup; a competing consumer may have taken
            // the value first.
            notified.await;
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Close the mailbox and wake every waiter.
    pub(crate) fn close(&self) {
        self.closed.cancel();
        self.readable.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let mailbox = Mailbox::new(4);

        assert!(mailbox.deliver(json!(1)).await);
        assert!(mailbox.deliver(json!(2)).await);
        assert!(mailbox.deliver(json!(3)).await);

        assert_eq!(mailbox.try_take(), Some(json!(1)));
        assert_eq!(mailbox.try_take(), Some(json!(2)));
        assert_eq!(mailbox.try_take(), Some(json!(3)));
        assert_eq!(mailbox.try_take(), None);
    }

    #[tokio::test]
    async fn test_deliver_blocks_when_full() {
        let mailbox = Arc::new(Mailbox::new(2));

        assert!(mailbox.deliver(json!(1)).await);
        assert!(mailbox.deliver(json!(2)).await);

        let blocked = tokio::spawn({
            let mailbox = Arc::clone(&mailbox);
            async move { mailbox.deliver(json!(3)).await }
        });

        // The third delivery must wait for a slot
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(mailbox.try_take(), Some(json!(1)));
        assert!(blocked.await.unwrap());

        assert_eq!(mailbox.try_take(), Some(json!(2)));
        assert_eq!(mailbox.try_take(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_take_if_declined_leaves_value() {
        let mailbox = Mailbox::new(2);
        mailbox.deliver(json!("v")).await;

        assert_eq!(mailbox.take_if(|| false), None);
        assert_eq!(mailbox.len(), 1);

        // Re-armed signal: a later waiter still sees the value
        tokio::time::timeout(Duration::from_secs(1), mailbox.readable())
            .await
            .expect("declined value should keep the mailbox readable");
        assert_eq!(mailbox.take_if(|| true), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_readable_wakes_on_deliver() {
        let mailbox = Mailbox::new(2);

        let mut readable = tokio_test::task::spawn(mailbox.readable());
        tokio_test::assert_pending!(readable.poll());

        assert!(mailbox.deliver(json!(1)).await);
        assert!(readable.is_woken());
        tokio_test::assert_ready!(readable.poll());
    }

    #[tokio::test]
    async fn test_close_wakes_waiters_and_rejects_delivery() {
        let mailbox = Arc::new(Mailbox::new(1));

        let waiter = tokio::spawn({
            let mailbox = Arc::clone(&mailbox);
            async move { mailbox.readable().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        mailbox.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("readable should fire on close")
            .unwrap();

        assert!(!mailbox.deliver(json!(1)).await);
        assert_eq!(mailbox.try_take(), None);
    }
}
