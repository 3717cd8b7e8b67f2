//! Best-effort member notifications.
//!
//! The engine hands every [`Notification`] to a [`Notifier`] on a detached
//! task after the triggering write has committed. Delivery is never awaited
//! by the caller: errors and timeouts are logged and dropped.

use crate::vote::VoteType;
use async_trait::async_trait;
use ledger::{Request, RequestStatus, User};
use metrics::counter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum NotifyError {
    Delivery(String),
    Timeout,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivery(msg) => write!(f, "Notification delivery failed: {}", msg),
            Self::Timeout => write!(f, "Notification timed out"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// A member to notify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

impl From<&User> for Recipient {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// One addressed message derived from a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: Recipient,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub enum Notification {
    Registered {
        user: User,
    },
    /// `members` is everyone who can vote on the request.
    RequestSubmitted {
        request: Request,
        requester: User,
        members: Vec<User>,
    },
    VoteReceived {
        request: Request,
        requester: User,
        voter: User,
        vote: VoteType,
    },
    RequestFinalized {
        request: Request,
        requester: User,
        voters: Vec<User>,
    },
    RequestCancelled {
        request: Request,
        requester: User,
        voters: Vec<User>,
    },
}

fn type_label(request: &Request) -> &'static str {
    match request.request_type() {
        ledger::RequestType::Loan => "Loan",
        ledger::RequestType::Deposit => "Deposit",
    }
}

fn status_label(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "Pending",
        RequestStatus::Approved => "Approved",
        RequestStatus::Rejected => "Rejected",
    }
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Registered { .. } => "registered",
            Notification::RequestSubmitted { .. } => "request_submitted",
            Notification::VoteReceived { .. } => "vote_received",
            Notification::RequestFinalized { .. } => "request_finalized",
            Notification::RequestCancelled { .. } => "request_cancelled",
        }
    }

    /// Subject of the message sent to the member the event is about.
    pub fn subject(&self) -> String {
        match self {
            Notification::Registered { .. } => {
                "Welcome to the Community Finance Pool".to_string()
            }
            Notification::RequestSubmitted { request, .. } => {
                format!("Your {} Request Has Been Submitted", type_label(request))
            }
            Notification::VoteReceived { request, .. } => {
                format!("New Vote on Your {} Request", type_label(request))
            }
            Notification::RequestFinalized { request, .. } => format!(
                "Your {} Request Has Been {}",
                type_label(request),
                status_label(request.status)
            ),
            Notification::RequestCancelled { request, .. } => {
                format!("Your {} Request Has Been Cancelled", type_label(request))
            }
        }
    }

    /// Every addressed message this event produces.
    pub fn messages(&self) -> Vec<Message> {
        let primary = |user: &User| Message {
            to: user.into(),
            subject: self.subject(),
        };

        match self {
            Notification::Registered { user } => vec![primary(user)],
            Notification::VoteReceived { requester, .. } => vec![primary(requester)],
            Notification::RequestSubmitted {
                request,
                requester,
                members,
            } => {
                let subject = format!("New {} Request Requires Your Vote", type_label(request));
                std::iter::once(primary(requester))
                    .chain(members.iter().map(|m| Message {
                        to: m.into(),
                        subject: subject.clone(),
                    }))
                    .collect()
            }
            Notification::RequestFinalized {
                request,
                requester,
                voters,
            } => {
                let subject = format!(
                    "{} Request {}",
                    type_label(request),
                    request.status.as_str().to_uppercase()
                );
                std::iter::once(primary(requester))
                    .chain(voters.iter().map(|v| Message {
                        to: v.into(),
                        subject: subject.clone(),
                    }))
                    .collect()
            }
            Notification::RequestCancelled {
                request,
                requester,
                voters,
            } => {
                let subject = format!("{} Request CANCELLED", type_label(request));
                std::iter::once(primary(requester))
                    .chain(voters.iter().map(|v| Message {
                        to: v.into(),
                        subject: subject.clone(),
                    }))
                    .collect()
            }
        }
    }

    pub fn recipients(&self) -> Vec<Recipient> {
        self.messages().into_iter().map(|m| m.to).collect()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Writes one `info` line per message.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        for message in notification.messages() {
            tracing::info!(
                kind = notification.kind(),
                to = %message.to.email,
                subject = %message.subject,
                "notification"
            );
        }
        Ok(())
    }
}

/// Fire and forget. Must be called from within a tokio runtime.
pub(crate) fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification, timeout: Duration) {
    tokio::spawn(async move {
        let kind = notification.kind();
        let result = match tokio::time::timeout(timeout, notifier.notify(&notification)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout),
        };

        match result {
            Ok(()) => {
                counter!("commonpool.notifications.total", "kind" => kind, "result" => "sent")
                    .increment(1);
            }
            Err(e) => {
                counter!("commonpool.notifications.total", "kind" => kind, "result" => "failed")
                    .increment(1);
                tracing::warn!(kind, error = %e, "notification dropped");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::{Money, RequestKind};
    use std::sync::Mutex;

    fn member(name: &str) -> User {
        User::new(name, format!("{}@example.com", name), Money::from_major(100))
    }

    #[test]
    fn test_submitted_messages() {
        let requester = member("asha");
        let members = vec![member("bina"), member("chetan")];
        let request = Request::new(
            requester.id,
            RequestKind::Deposit,
            Money::from_major(10),
            "savings",
            2,
        );
        let notification = Notification::RequestSubmitted {
            request,
            requester,
            members,
        };

        let messages = notification.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].to.email, "asha@example.com");
        assert_eq!(messages[0].subject, "Your Deposit Request Has Been Submitted");
        assert_eq!(messages[1].subject, "New Deposit Request Requires Your Vote");
        assert_eq!(notification.recipients()[2].name, "chetan");
    }

    #[test]
    fn test_finalized_subjects() {
        let requester = member("asha");
        let mut request = Request::new(
            requester.id,
            RequestKind::Loan {
                title: "Cart".to_string(),
                category: "business".to_string(),
            },
            Money::from_major(10),
            "vegetable cart",
            1,
        );
        request.status = RequestStatus::Approved;
        let notification = Notification::RequestFinalized {
            request,
            requester,
            voters: vec![member("bina")],
        };

        assert_eq!(notification.subject(), "Your Loan Request Has Been Approved");
        assert_eq!(notification.messages()[1].subject, "Loan Request APPROVED");
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("smtp down".to_string()))
        }
    }

    struct Recording(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(notification.kind());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_delivers_in_background() {
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        dispatch(
            recording.clone(),
            Notification::Registered {
                user: member("asha"),
            },
            Duration::from_secs(1),
        );

        for _ in 0..50 {
            if !recording.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*recording.0.lock().unwrap(), vec!["registered"]);
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        dispatch(
            Arc::new(Failing),
            Notification::Registered {
                user: member("asha"),
            },
            Duration::from_secs(1),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
