//! Wire types for the `neighbor.NeighborService` streaming RPC.
//!
//! The client and server stubs are generated by `build.rs`.

/// A single heartbeat frame exchanged in both directions of a stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(string, tag = "1")]
    pub sender: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub content: ::prost::alloc::string::String,
    /// Unix seconds.
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

impl Message {
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Acknowledgment for `self`, sent back by the inbound handler.
    pub fn ack(&self, sender: impl Into<String>) -> Self {
        Self::new(sender, format!("ACK: {}", self.content))
    }
}

include!(concat!(env!("OUT_DIR"), "/neighbor.NeighborService.rs"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_prefixes_content_and_replaces_sender() {
        let original = Message::new("service1", "Zx81kq0PaB");
        let ack = original.ack("service2");

        assert_eq!(ack.sender, "service2");
        assert_eq!(ack.content, "ACK: Zx81kq0PaB");
        assert!(ack.timestamp >= original.timestamp);
        // input is untouched
        assert_eq!(original.sender, "service1");
        assert_eq!(original.content, "Zx81kq0PaB");
    }
}
