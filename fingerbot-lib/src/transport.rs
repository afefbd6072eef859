//! The seam between the protocol session and whatever moves bytes to the
//! device.
//!
//! A transport writes single packets (already fragmented to the MTU) and
//! pushes every notification it receives into the channel handed to
//! [`Transport::connect`]. Notifications may arrive on any task or thread;
//! the channel is the only way they reach the session, so the session
//! processes them one at a time on its own task.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub type NotificationSender = mpsc::UnboundedSender<Bytes>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<Bytes>;

pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}

pub trait Transport: Send {
    /// Connect to `address` and subscribe to the notify characteristic.
    /// Every notification payload goes to `notifications`.
    fn connect(
        &mut self,
        address: &str,
        notifications: NotificationSender,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Write one packet without waiting for a response.
    fn write(&mut self, packet: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
