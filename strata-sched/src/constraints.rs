use serde::{Deserialize, Serialize};
use strata_utils::Id;

/// Which endpoint of a channel a constraint names.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum IoDirection {
    Send,
    Receive,
}

/// Bounds the latency between two channel operations: for every matching
/// (source, target) pair of sends/receives,
/// `minimum_latency <= cycle[target] - cycle[source] <= maximum_latency`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IoConstraint {
    pub source_channel: Id,
    pub source_direction: IoDirection,
    pub target_channel: Id,
    pub target_direction: IoDirection,
    pub minimum_latency: i64,
    pub maximum_latency: i64,
}

/// A user-supplied scheduling constraint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SchedulingConstraint {
    Io(IoConstraint),
    /// Pin every receive to the first cycle and every send to the last.
    RecvsFirstSendsLast,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraints_round_trip_as_json() {
        let constraint = SchedulingConstraint::Io(IoConstraint {
            source_channel: Id::new("req"),
            source_direction: IoDirection::Receive,
            target_channel: Id::new("resp"),
            target_direction: IoDirection::Send,
            minimum_latency: 2,
            maximum_latency: 2,
        });
        let json = serde_json::to_string(&constraint).unwrap();
        let back: SchedulingConstraint = serde_json::from_str(&json).unwrap();
        let SchedulingConstraint::Io(io) = back else {
            panic!("wrong variant");
        };
        assert_eq!(io.source_channel, Id::new("req"));
        assert_eq!(io.minimum_latency, 2);
    }
}
