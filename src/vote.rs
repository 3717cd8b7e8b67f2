use crate::error::Error;
use ledger::{GlobalFund, Money, Request, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Approve,
    Reject,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Approve => "approve",
            VoteType::Reject => "reject",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(VoteType::Approve),
            "reject" => Ok(VoteType::Reject),
            other => Err(Error::Validation(format!("invalid vote type: {}", other))),
        }
    }
}

/// Checks a vote must pass once both the request and the voter are known to
/// exist. First failure wins.
pub fn validate(request: &Request, voter_id: Uuid) -> Result<(), Error> {
    if !request.is_pending() {
        return Err(Error::InvalidState(format!(
            "request {} is not pending",
            request.id
        )));
    }
    if request.user_id == voter_id {
        return Err(Error::Forbidden(
            "cannot vote on own request".to_string(),
        ));
    }
    if request.has_voted(voter_id) {
        return Err(Error::Conflict(format!(
            "user {} already voted on request {}",
            voter_id, request.id
        )));
    }
    Ok(())
}

/// Validate and append the vote. On error the request is untouched.
pub fn record_vote(request: &mut Request, voter_id: Uuid, vote: VoteType) -> Result<(), Error> {
    validate(request, voter_id)?;
    match vote {
        VoteType::Approve => request.approved_by.push(voter_id),
        VoteType::Reject => request.rejected_by.push(voter_id),
    }
    Ok(())
}

/// Whether `voter_id` already sits on the `vote` side of the request.
pub fn is_recorded(request: &Request, voter_id: Uuid, vote: VoteType) -> bool {
    let side = match vote {
        VoteType::Approve => &request.approved_by,
        VoteType::Reject => &request.rejected_by,
    };
    side.contains(&voter_id)
}

/// What a successful vote left behind.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    /// The request after this vote, possibly finalized by it.
    pub request: Request,
    pub global_fund: GlobalFund,
    pub requester_balance: Money,
    pub voter_balance: Money,
    /// Set when this vote settled the request.
    pub resolution: Option<Resolution>,
}

impl VoteOutcome {
    pub fn finalized(&self) -> bool {
        self.resolution.is_some()
    }

    /// The balance a client should refresh: the requester's when this vote
    /// settled the request, the voter's otherwise.
    pub fn voter_or_requester_balance(&self) -> Money {
        if self.finalized() {
            self.requester_balance
        } else {
            self.voter_balance
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::RequestKind;

    fn loan() -> Request {
        Request::new(
            Uuid::now_v7(),
            RequestKind::Loan {
                title: "Sewing machine".to_string(),
                category: "business".to_string(),
            },
            Money::from_major(1_000),
            "tailoring shop",
            4,
        )
    }

    #[test]
    fn test_record_approve_and_reject() {
        let mut request = loan();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        record_vote(&mut request, a, VoteType::Approve).unwrap();
        record_vote(&mut request, b, VoteType::Reject).unwrap();

        assert_eq!(request.approved_by, vec![a]);
        assert_eq!(request.rejected_by, vec![b]);
    }

    #[test]
    fn test_is_recorded_checks_the_side() {
        let mut request = loan();
        let voter = Uuid::now_v7();
        assert!(!is_recorded(&request, voter, VoteType::Approve));

        record_vote(&mut request, voter, VoteType::Approve).unwrap();
        assert!(is_recorded(&request, voter, VoteType::Approve));
        assert!(!is_recorded(&request, voter, VoteType::Reject));
    }

    #[test]
    fn test_self_vote_is_forbidden() {
        let mut request = loan();
        let owner = request.user_id;
        let err = record_vote(&mut request, owner, VoteType::Approve).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(request.approved_by.is_empty());
    }

    #[test]
    fn test_double_vote_conflicts_even_when_switching_sides() {
        let mut request = loan();
        let voter = Uuid::now_v7();
        record_vote(&mut request, voter, VoteType::Approve).unwrap();

        for vote in [VoteType::Approve, VoteType::Reject] {
            let err = record_vote(&mut request, voter, vote).unwrap_err();
            assert!(matches!(err, Error::Conflict(_)));
        }
        assert_eq!(request.approvals(), 1);
        assert_eq!(request.rejections(), 0);
    }

    #[test]
    fn test_not_pending_wins_over_self_vote() {
        let mut request = loan();
        request.status = ledger::RequestStatus::Approved;
        let owner = request.user_id;
        let err = record_vote(&mut request, owner, VoteType::Approve).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_vote_type_parse() {
        assert_eq!("approve".parse::<VoteType>().unwrap(), VoteType::Approve);
        assert_eq!("reject".parse::<VoteType>().unwrap(), VoteType::Reject);
        assert!(matches!(
            "maybe".parse::<VoteType>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_voter_or_requester_balance() {
        let mut outcome = VoteOutcome {
            request: loan(),
            global_fund: GlobalFund::new(Money::from_major(100)),
            requester_balance: Money::from_major(10),
            voter_balance: Money::from_major(20),
            resolution: None,
        };
        assert_eq!(outcome.voter_or_requester_balance(), Money::from_major(20));

        outcome.resolution = Some(Resolution::Approved);
        assert_eq!(outcome.voter_or_requester_balance(), Money::from_major(10));
    }
}
