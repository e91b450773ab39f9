use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::bottle::Bottle;

use super::route::Route;

/// One decoded inbound message on its way from an input worker to the port's consumer.
/// For reply-capable connections the worker parks on the `replier` channel; dropping it
///  unreplied releases the worker with an empty reply.
pub struct Delivery {
    pub route: Route,
    pub bottle: Bottle,
    pub replier: Option<oneshot::Sender<Bottle>>,
}

/// The single-slot inbound buffer used when no callback is installed: capacity one,
///  newest message replaces an unread older one (tail drop), so a slow consumer always
///  sees the freshest data.
#[derive(Default)]
pub struct Mailbox {
    slot: Mutex<Option<Delivery>>,
    notify: Notify,
}

impl Mailbox {
    pub fn put(&self, delivery: Delivery) {
        // an overwritten unread delivery drops its replier, releasing that worker
        *self.slot.lock().unwrap() = Some(delivery);
        self.notify.notify_one();
    }

    pub fn try_take(&self) -> Option<Delivery> {
        self.slot.lock().unwrap().take()
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bottle::Value;

    fn delivery(n: i32) -> Delivery {
        let mut bottle = Bottle::new();
        bottle.add_i32(n);
        Delivery {
            route: Route::new("/src", "/dst", "tcp"),
            bottle,
            replier: None,
        }
    }

    #[test]
    fn test_tail_drop_keeps_newest() {
        let mailbox = Mailbox::default();
        mailbox.put(delivery(1));
        mailbox.put(delivery(2));
        mailbox.put(delivery(3));

        let taken = mailbox.try_take().unwrap();
        assert_eq!(taken.bottle.get(0), &Value::Int32(3));
        assert!(mailbox.try_take().is_none());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_put() {
        let mailbox = std::sync::Arc::new(Mailbox::default());
        let waiter = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(d) = mailbox.try_take() {
                        return d;
                    }
                    mailbox.wait().await;
                }
            })
        };
        tokio::task::yield_now().await;
        mailbox.put(delivery(7));
        let taken = waiter.await.unwrap();
        assert_eq!(taken.bottle.get(0), &Value::Int32(7));
    }
}
