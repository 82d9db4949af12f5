use serde_json::Value;
use tokio::sync::mpsc;

/// The WebRTC side of a session. Remote fragments are handed to it in the
/// order they are first seen, each at most once.
pub trait TransportPeer: Send + 'static {
    fn signal(&mut self, fragment: Value);
}

/// Forwards fragments to whoever holds the receiver, typically the task
/// driving the real peer connection.
impl TransportPeer for mpsc::UnboundedSender<Value> {
    fn signal(&mut self, fragment: Value) {
        let _ = self.send(fragment);
    }
}
