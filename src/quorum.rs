//! Vote thresholds.
//!
//! Pure integer arithmetic: thresholds are held in basis points so that
//! `ceil(n * 0.8)` never suffers from float representation error.

use crate::config::{EngineConfig, RejectionRule};

const BPS_SCALE: u64 = 10_000;

fn to_bps(fraction: f64) -> u32 {
    (fraction * BPS_SCALE as f64).round().clamp(1.0, BPS_SCALE as f64) as u32
}

fn ceil_bps(count: u32, bps: u32) -> u32 {
    let scaled = count as u64 * bps as u64;
    scaled.div_ceil(BPS_SCALE) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Impossibility,
    Threshold(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumPolicy {
    approval_bps: u32,
    rejection: Rejection,
}

impl QuorumPolicy {
    pub fn new(approval_threshold: f64, rejection_rule: RejectionRule) -> Self {
        let rejection = match rejection_rule {
            RejectionRule::Impossibility => Rejection::Impossibility,
            RejectionRule::Threshold { threshold } => Rejection::Threshold(to_bps(threshold)),
        };
        Self {
            approval_bps: to_bps(approval_threshold),
            rejection,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.approval_threshold, config.rejection_rule)
    }

    /// Everyone except the requester.
    pub fn eligible_voters(total_users: usize) -> u32 {
        total_users.saturating_sub(1).try_into().unwrap_or(u32::MAX)
    }

    /// `ceil(eligible * threshold)`; 0 when nobody can vote.
    pub fn required_approvals(&self, eligible_voters: u32) -> u32 {
        if eligible_voters == 0 {
            return 0;
        }
        ceil_bps(eligible_voters, self.approval_bps)
    }

    /// Rejections that settle a request as rejected, when the rule has a
    /// fixed count. Under the impossibility rule this is
    /// `eligible - votes_required + 1`.
    pub fn required_rejections(&self, eligible_voters: u32, votes_required: u32) -> u32 {
        match self.rejection {
            Rejection::Impossibility => eligible_voters.saturating_sub(votes_required) + 1,
            Rejection::Threshold(bps) => ceil_bps(eligible_voters, bps).max(1),
        }
    }

    pub fn is_approved(&self, approvals: usize, votes_required: u32) -> bool {
        approvals >= votes_required as usize
    }

    pub fn is_rejected(&self, rejections: usize, eligible_voters: u32, votes_required: u32) -> bool {
        rejections >= self.required_rejections(eligible_voters, votes_required) as usize
    }
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligible_voters_excludes_requester() {
        assert_eq!(QuorumPolicy::eligible_voters(0), 0);
        assert_eq!(QuorumPolicy::eligible_voters(1), 0);
        assert_eq!(QuorumPolicy::eligible_voters(5), 4);
    }

    #[test]
    fn test_required_approvals_table() {
        let policy = QuorumPolicy::default();
        let cases = [
            (0, 0),
            (1, 1),
            (2, 2),
            (3, 3),
            (4, 4),
            (5, 4),
            (6, 5),
            (9, 8),
            (10, 8),
            (11, 9),
            (100, 80),
            (101, 81),
        ];
        for (eligible, expected) in cases {
            assert_eq!(
                policy.required_approvals(eligible),
                expected,
                "eligible = {}",
                eligible
            );
        }
    }

    #[test]
    fn test_low_threshold_from_later_revision() {
        let policy = QuorumPolicy::new(0.1, RejectionRule::Impossibility);
        assert_eq!(policy.required_approvals(1), 1);
        assert_eq!(policy.required_approvals(10), 1);
        assert_eq!(policy.required_approvals(11), 2);
    }

    #[test]
    fn test_required_approvals_is_monotonic() {
        let policy = QuorumPolicy::default();
        let mut previous = 0;
        for n in 1..2_000 {
            let required = policy.required_approvals(n);
            assert!(required >= previous, "dropped at n = {}", n);
            assert!(required <= n);
            previous = required;
        }
    }

    #[test]
    fn test_impossibility_rule() {
        let policy = QuorumPolicy::default();

        // 4 eligible, 4 required: the first rejection makes approval impossible
        assert_eq!(policy.required_rejections(4, 4), 1);
        assert!(policy.is_rejected(1, 4, 4));
        assert!(!policy.is_rejected(0, 4, 4));

        // 10 eligible, 8 required: two rejections still leave 8 possible approvals
        assert!(!policy.is_rejected(2, 10, 8));
        assert!(policy.is_rejected(3, 10, 8));
    }

    #[test]
    fn test_threshold_rule() {
        let policy = QuorumPolicy::new(0.8, RejectionRule::Threshold { threshold: 0.2 });
        assert_eq!(policy.required_rejections(10, 8), 2);
        assert_eq!(policy.required_rejections(4, 4), 1);
        // Never zero, or an empty request would reject itself
        assert_eq!(policy.required_rejections(0, 0), 1);
        assert!(!policy.is_rejected(1, 10, 8));
        assert!(policy.is_rejected(2, 10, 8));
    }

    #[test]
    fn test_is_approved() {
        let policy = QuorumPolicy::default();
        assert!(policy.is_approved(0, 0));
        assert!(!policy.is_approved(3, 4));
        assert!(policy.is_approved(4, 4));
    }
}
