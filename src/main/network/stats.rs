use serde::Serialize;

/// Counts of what happened to frames in one engine.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Frames sent by guests.
    pub sent: u64,
    /// Frames added to an inbound queue, including duplicates and replies.
    pub delivered: u64,
    pub dropped_by_policy: u64,
    pub dropped_no_socket: u64,
    /// Extra copies created by the policy.
    pub duplicated: u64,
    pub deferred: u64,
    /// Synthetic replies created by the policy.
    pub replies: u64,
}

impl NetworkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames that left the network without reaching a socket.
    pub fn dropped(&self) -> u64 {
        self.dropped_by_policy + self.dropped_no_socket
    }

    pub fn write_json(&self, writer: impl std::io::Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json() {
        let stats = NetworkStats {
            sent: 3,
            delivered: 2,
            dropped_no_socket: 1,
            ..Default::default()
        };

        let mut buf = vec![];
        stats.write_json(&mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        assert_eq!(value["sent"], 3);
        assert_eq!(value["delivered"], 2);
        assert_eq!(value["dropped_no_socket"], 1);
        assert_eq!(value["replies"], 0);
        assert_eq!(stats.dropped(), 1);
    }
}
