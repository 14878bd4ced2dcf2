//! Mode resolution.
//!
//! Pure domain logic - no I/O.

use crate::snapshot::PolicySnapshot;

/// Resolve the performance mode for a foreground package.
///
/// Returns the mode whose member set contains `package_id`, or the snapshot's
/// default mode when no mode lists it. Modes are scanned in name order, so a
/// package listed under several modes resolves to the lexicographically
/// smallest one regardless of how the snapshot was built.
pub fn resolve_mode<'a>(package_id: &str, snapshot: &'a PolicySnapshot) -> &'a str {
    snapshot
        .mode_members()
        .iter()
        .find(|(_, members)| members.contains(package_id))
        .map(|(mode, _)| mode.as_str())
        .unwrap_or_else(|| snapshot.default_mode())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PolicySnapshot {
        PolicySnapshot::new("powersave")
            .with_members("fast", ["com.game"])
            .with_members("balance", ["com.browser"])
            .with_members("performance", Vec::<String>::new())
    }

    #[test]
    fn test_assigned_package() {
        assert_eq!(resolve_mode("com.game", &snapshot()), "fast");
        assert_eq!(resolve_mode("com.browser", &snapshot()), "balance");
    }

    #[test]
    fn test_unassigned_falls_back_to_default() {
        assert_eq!(resolve_mode("com.unknown", &snapshot()), "powersave");
        assert_eq!(resolve_mode("", &snapshot()), "powersave");
    }

    #[test]
    fn test_duplicate_membership_picks_smallest_mode() {
        let snapshot = PolicySnapshot::new("powersave")
            .with_members("performance", ["com.a"])
            .with_members("fast", ["com.a"])
            .with_members("balance", ["com.a"]);

        for _ in 0..10 {
            assert_eq!(resolve_mode("com.a", &snapshot), "balance");
        }
    }

    #[test]
    fn test_resolution_independent_of_build_order() {
        let forward = PolicySnapshot::new("powersave")
            .with_members("fast", ["com.a"])
            .with_members("balance", ["com.a"]);
        let reverse = PolicySnapshot::new("powersave")
            .with_members("balance", ["com.a"])
            .with_members("fast", ["com.a"]);

        assert_eq!(resolve_mode("com.a", &forward), resolve_mode("com.a", &reverse));
    }
}
