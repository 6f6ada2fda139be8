//! Deterministic negotiation channel naming.
//!
//! Both devices must derive the same channel name without talking to each
//! other first. The replica created earlier is the senior side; the name is
//! `<namespace>-<senior>_<junior>`.

use crate::device::{Device, LocalReplica};

/// Which side of a channel the local replica occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Senior,
    Junior,
}

/// Compute the negotiation channel name shared with `remote`.
///
/// The local replica's creation time is compared with the remote device's
/// link time. Equal timestamps fall back to the device ids so that the two
/// sides still agree.
pub fn channel_name(
    namespace: &str,
    local: &LocalReplica,
    remote: &Device,
) -> (String, ChannelRole) {
    let local_key = (local.created_at, local.device_id.as_str());
    let remote_key = (remote.linked_at, remote.id.as_str());

    let (role, senior, junior) = if local_key < remote_key {
        (ChannelRole::Senior, &local.device_id, &remote.id)
    } else {
        (ChannelRole::Junior, &remote.id, &local.device_id)
    };

    (format!("{namespace}-{senior}_{junior}"), role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_name() {
        // A created at 10, B created by linking at 20.
        let a = LocalReplica::new("X", 10);
        let b = LocalReplica::new("Y", 20);
        let b_seen_by_a = Device::new("Y", "B", 20, 20);
        let a_seen_by_b = Device::new("X", "A", 10, 20);

        let (from_a, role_a) = channel_name("ns", &a, &b_seen_by_a);
        let (from_b, role_b) = channel_name("ns", &b, &a_seen_by_b);

        assert_eq!(from_a, "ns-X_Y");
        assert_eq!(from_a, from_b);
        assert_eq!(role_a, ChannelRole::Senior);
        assert_eq!(role_b, ChannelRole::Junior);
    }

    #[test]
    fn test_equal_timestamps_tie_break_on_id() {
        let a = LocalReplica::new("X", 20);
        let b = LocalReplica::new("Y", 20);
        let b_seen_by_a = Device::new("Y", "B", 20, 20);
        let a_seen_by_b = Device::new("X", "A", 20, 20);

        let (from_a, _) = channel_name("ns", &a, &b_seen_by_a);
        let (from_b, _) = channel_name("ns", &b, &a_seen_by_b);

        assert_eq!(from_a, from_b);
        assert_eq!(from_a, "ns-X_Y");
    }
}
