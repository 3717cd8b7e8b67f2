//! Request/response shapes for a thin HTTP or RPC layer, and the read-side
//! views the engine returns.
//!
//! Field names are camelCase on the wire. Amounts cross this boundary as
//! decimal numbers and are converted to exact [`Money`] immediately.

use crate::error::Error;
use crate::vote::VoteType;
use crate::Engine;
use ledger::{Money, Request, RequestKind, RequestStatus, RequestType, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const UNKNOWN_USER: &str = "Unknown User";

// ==================== Views ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&User> for MemberSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

fn name_of(users: &[User], id: Uuid) -> String {
    users
        .iter()
        .find(|u| u.id == id)
        .map(|u| u.name.clone())
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

/// A request with its requester's display name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    #[serde(flatten)]
    pub request: Request,
    pub requester_name: String,
}

impl RequestSummary {
    pub fn new(request: Request, users: &[User]) -> Self {
        let requester_name = name_of(users, request.user_id);
        Self {
            request,
            requester_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: Request,
    /// `None` when the requester record no longer exists.
    pub requester: Option<MemberSummary>,
    pub approver_names: Vec<String>,
    pub rejector_names: Vec<String>,
}

impl RequestDetail {
    pub fn new(request: Request, users: &[User]) -> Self {
        let requester = users
            .iter()
            .find(|u| u.id == request.user_id)
            .map(MemberSummary::from);
        let approver_names = request
            .approved_by
            .iter()
            .map(|id| name_of(users, *id))
            .collect();
        let rejector_names = request
            .rejected_by
            .iter()
            .map(|id| name_of(users, *id))
            .collect();
        Self {
            request,
            requester,
            approver_names,
            rejector_names,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<RequestStatus>,
    #[serde(default, rename = "type")]
    pub request_type: Option<RequestType>,
}

impl HistoryFilter {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, request: &Request) -> bool {
        self.user_id.is_none_or(|id| request.user_id == id)
            && self.status.is_none_or(|s| request.status == s)
            && self
                .request_type
                .is_none_or(|t| request.request_type() == t)
    }
}

// ==================== Commands ====================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCommand {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub account_balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCommand {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub request_type: String,
    pub amount: f64,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCommand {
    pub request_id: Uuid,
    #[serde(alias = "userId")]
    pub voter_id: Uuid,
    pub vote_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub status: &'static str,
    pub new_request_status: RequestStatus,
    pub global_fund: f64,
    pub voter_or_requester_balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelCommand {
    pub request_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub status: &'static str,
    pub request_id: Uuid,
}

/// Error body returned to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            code: "validation_error",
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotFound(_) => 404,
            Error::InvalidState(_) | Error::Validation(_) => 400,
            Error::Forbidden(_) => 403,
            Error::Conflict(_) => 409,
            Error::StoreUnavailable(_) => 503,
            Error::Invariant(_) => 500,
        };
        let message = match &err {
            // Internal details stay in the logs
            Error::Invariant(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        Self {
            status,
            code: err.code(),
            message,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ==================== Handlers ====================

fn amount_from(value: f64) -> Result<Money, ApiError> {
    Money::from_decimal(value).ok_or_else(|| ApiError::bad_request("amount must be a finite number"))
}

pub async fn register(engine: &Engine, cmd: RegisterCommand) -> Result<RegisterResponse, ApiError> {
    let user = engine.register_user(&cmd.name, &cmd.email).await?;
    Ok(RegisterResponse {
        user_id: user.id,
        account_balance: user.account_balance.to_display(),
    })
}

pub async fn submit(engine: &Engine, cmd: SubmitCommand) -> Result<SubmitResponse, ApiError> {
    let request_type: RequestType = cmd
        .request_type
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid request type"))?;
    let kind = match request_type {
        RequestType::Loan => RequestKind::Loan {
            title: cmd.title.unwrap_or_default(),
            category: cmd.category.unwrap_or_default(),
        },
        RequestType::Deposit => RequestKind::Deposit,
    };
    let amount = amount_from(cmd.amount)?;

    let request = engine
        .submit_request(cmd.user_id, kind, amount, &cmd.details)
        .await?;
    Ok(SubmitResponse {
        request_id: request.id,
    })
}

pub async fn vote(engine: &Engine, cmd: VoteCommand) -> Result<VoteResponse, ApiError> {
    let vote: VoteType = cmd.vote_type.parse()?;
    let outcome = engine.cast_vote(cmd.request_id, cmd.voter_id, vote).await?;
    Ok(VoteResponse {
        status: "success",
        new_request_status: outcome.request.status,
        global_fund: outcome.global_fund.total_fund.to_display(),
        voter_or_requester_balance: outcome.voter_or_requester_balance().to_display(),
    })
}

pub async fn cancel(engine: &Engine, cmd: CancelCommand) -> Result<CancelResponse, ApiError> {
    let request = engine.cancel_request(cmd.request_id, cmd.user_id).await?;
    Ok(CancelResponse {
        status: "success",
        request_id: request.id,
    })
}

fn parse<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError {
        status: 500,
        code: "internal_error",
        message: e.to_string(),
    })
}

/// Route a JSON body to the matching command handler.
pub async fn handle_json(engine: &Engine, action: &str, body: &str) -> Result<Value, ApiError> {
    match action {
        "register" => to_value(register(engine, parse(body)?).await?),
        "submit" => to_value(submit(engine, parse(body)?).await?),
        "vote" => to_value(vote(engine, parse(body)?).await?),
        "cancel" => to_value(cancel(engine, parse(body)?).await?),
        other => Err(ApiError {
            status: 404,
            code: "not_found",
            message: format!("unknown action: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::RequestKind;
    use serde_json::json;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::NotFound("x".into()), 404, "not_found"),
            (Error::InvalidState("x".into()), 400, "invalid_state"),
            (Error::Forbidden("x".into()), 403, "forbidden"),
            (Error::Conflict("x".into()), 409, "conflict"),
            (Error::Validation("x".into()), 400, "validation_error"),
            (Error::StoreUnavailable("x".into()), 503, "store_unavailable"),
            (Error::Invariant("x".into()), 500, "internal_error"),
        ];
        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn test_vote_command_accepts_user_id_alias() {
        let request_id = Uuid::now_v7();
        let voter = Uuid::now_v7();
        let cmd: VoteCommand = serde_json::from_value(json!({
            "requestId": request_id,
            "userId": voter,
            "voteType": "approve",
        }))
        .unwrap();
        assert_eq!(cmd.voter_id, voter);

        let cmd: VoteCommand = serde_json::from_value(json!({
            "requestId": request_id,
            "voterId": voter,
            "voteType": "reject",
        }))
        .unwrap();
        assert_eq!(cmd.vote_type, "reject");
    }

    #[test]
    fn test_history_filter() {
        let owner = Uuid::now_v7();
        let mut request = Request::new(owner, RequestKind::Deposit, Money::from_major(1), "x", 1);

        assert!(HistoryFilter::default().matches(&request));
        assert!(HistoryFilter::for_user(owner).matches(&request));
        assert!(!HistoryFilter::for_user(Uuid::now_v7()).matches(&request));

        let approved_loans: HistoryFilter =
            serde_json::from_value(json!({ "status": "approved", "type": "loan" })).unwrap();
        assert!(!approved_loans.matches(&request));
        request.status = RequestStatus::Approved;
        assert!(!approved_loans.matches(&request));
        request.kind = RequestKind::Loan {
            title: "t".into(),
            category: "c".into(),
        };
        assert!(approved_loans.matches(&request));
    }

    #[test]
    fn test_unknown_names_fall_back() {
        let known = User::new("Asha", "asha@example.com", Money::ZERO);
        let mut request = Request::new(Uuid::now_v7(), RequestKind::Deposit, Money::from_major(1), "x", 2);
        request.approved_by.push(known.id);
        request.rejected_by.push(Uuid::now_v7());

        let users = vec![known];
        let detail = RequestDetail::new(request.clone(), &users);
        assert!(detail.requester.is_none());
        assert_eq!(detail.approver_names, vec!["Asha"]);
        assert_eq!(detail.rejector_names, vec![UNKNOWN_USER]);
        assert_eq!(RequestSummary::new(request, &users).requester_name, UNKNOWN_USER);
    }

    #[test]
    fn test_summary_serializes_flat() {
        let request = Request::new(Uuid::now_v7(), RequestKind::Deposit, Money::from_major(1), "x", 2);
        let value = serde_json::to_value(RequestSummary::new(request, &[])).unwrap();
        assert_eq!(value["requesterName"], UNKNOWN_USER);
        assert_eq!(value["votesRequired"], 2);
        assert_eq!(value["status"], "pending");
    }
}
