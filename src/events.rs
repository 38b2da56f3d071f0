//! Step-completed notifications.
//!
//! After every successful training step the network publishes one immutable
//! [`StepEvent`] to each subscriber. Subscribers are plain `mpsc` receivers, so the
//! network never holds a reference to whatever renders, logs or tracks the events.
//! A receiver that has been dropped is pruned on the next publish.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::Matrix;

#[derive(Debug, Clone, PartialEq)]
pub struct StepEvent {
    /// 1-based count of successful training steps on the publishing network.
    pub step: u64,
    pub loss: f32,
    pub prediction: Matrix,
    /// Per-layer outputs from this step's forward pass.
    pub activations: Vec<Matrix>,
    /// Per-layer gradient received from the layer after it (the loss seed for the last).
    pub gradients: Vec<Matrix>,
    /// Per-layer weights after the update.
    pub weights: Vec<Matrix>,
}

#[derive(Debug, Default)]
pub struct StepPublisher {
    subscribers: Vec<Sender<Arc<StepEvent>>>,
}

impl StepPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<Arc<StepEvent>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    #[inline]
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Send `event` to every live subscriber; returns how many received it.
    pub fn publish(&mut self, event: StepEvent) -> usize {
        let event = Arc::new(event);
        self.subscribers
            .retain(|tx| tx.send(Arc::clone(&event)).is_ok());
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(step: u64) -> StepEvent {
        let m = Matrix::zeros(1, 1).unwrap();
        StepEvent {
            step,
            loss: 0.0,
            prediction: m.clone(),
            activations: vec![m.clone()],
            gradients: vec![m.clone()],
            weights: vec![m],
        }
    }

    #[test]
    fn every_subscriber_gets_each_event() {
        let mut publisher = StepPublisher::new();
        let a = publisher.subscribe();
        let b = publisher.subscribe();

        assert_eq!(publisher.publish(event(1)), 2);
        assert_eq!(a.try_recv().unwrap().step, 1);
        assert_eq!(b.try_recv().unwrap().step, 1);
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut publisher = StepPublisher::new();
        let keep = publisher.subscribe();
        drop(publisher.subscribe());
        assert_eq!(publisher.subscriber_count(), 2);

        assert_eq!(publisher.publish(event(1)), 1);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(keep.try_recv().unwrap().step, 1);

        drop(keep);
        assert_eq!(publisher.publish(event(2)), 0);
        assert!(!publisher.has_subscribers());
    }
}
