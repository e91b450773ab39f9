use std::sync::Mutex;
use tokio::sync::mpsc;

use super::route::Route;

/// Connection lifecycle and failure reports. Everything that changes or breaks a
///  connection is announced here - never silently dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortEvent {
    InputAdded(Route),
    InputRemoved(Route),
    OutputAdded(Route),
    OutputRemoved(Route),
    ConnectionError { route: Route, message: String },
}

/// Fan-out diagnostic channel. Subscribers that went away are pruned on the next report.
#[derive(Default)]
pub struct EventReporter {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PortEvent>>>,
}

impl EventReporter {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PortEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn report(&self, event: PortEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
