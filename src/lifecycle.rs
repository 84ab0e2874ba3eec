use crate::db::{ComplaintStore, RowScope};
use crate::errors::{AppError, AppResult};
use crate::models::{
    Complaint, ComplaintFilter, NotificationOutcome, Principal, SmsRequest, StatusUpdateResponse,
    SubmitComplaintPayload, UpdateStatusPayload,
};
use crate::policy::SubmissionPolicy;
use crate::redaction::Redactor;
use crate::relay::NotificationRelay;
use crate::subscription::{LiveList, Subscription, SubscriptionScope};
use std::sync::Arc;

/// Creation, triage and visibility rules for complaints.
///
/// Every operation takes the caller's [`Principal`] explicitly. Status
/// transitions are unrestricted: any status may follow any other. Two admins
/// editing the same complaint race, and the later write wins.
#[derive(Clone)]
pub struct ComplaintService {
    store: Arc<dyn ComplaintStore>,
    policy: SubmissionPolicy,
    relay: Option<Arc<NotificationRelay>>,
    redactor: Redactor,
}

impl ComplaintService {
    pub fn new(store: Arc<dyn ComplaintStore>) -> Self {
        Self {
            store,
            policy: SubmissionPolicy::new(),
            relay: None,
            redactor: Redactor::new(),
        }
    }

    /// Sends an SMS to the complainant after each successful status update.
    pub fn with_notifications(mut self, relay: Arc<NotificationRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn submit(&self, submitter: &Principal, payload: SubmitComplaintPayload) -> AppResult<Complaint> {
        let complaint = self.policy.validate(&payload, submitter)?;
        let created = self.store.insert_complaint(&complaint)?;
        tracing::info!(
            complaint_id = %created.id,
            district = %created.district,
            category = %created.service_category,
            phone = %self.redactor.mask_phone(&created.phone),
            anonymous = created.user_id.is_nil(),
            "complaint submitted"
        );
        Ok(created)
    }

    pub fn list_own(&self, principal: &Principal) -> AppResult<Vec<Complaint>> {
        let identity = principal
            .identity()
            .ok_or_else(|| AppError::Auth("Sign in to see your complaints".to_string()))?;
        self.store
            .list_complaints(RowScope::Owner(identity.user_id), &ComplaintFilter::default())
    }

    pub fn list_all(&self, principal: &Principal, filter: &ComplaintFilter) -> AppResult<Vec<Complaint>> {
        require_admin_principal(principal)?;
        self.store.list_complaints(RowScope::All, filter)
    }

    pub fn get(&self, principal: &Principal, complaint_id: uuid::Uuid) -> AppResult<Complaint> {
        let scope = match principal {
            Principal::Admin(_) => RowScope::All,
            Principal::Citizen(identity) => RowScope::Owner(identity.user_id),
            Principal::Anonymous => {
                return Err(AppError::Auth("Sign in to see your complaints".to_string()));
            }
        };
        self.store
            .get_complaint(scope, complaint_id)?
            .ok_or_else(|| AppError::NotFound(format!("Complaint {} not found", complaint_id)))
    }

    /// Persists the new status first; the SMS is best effort and its failure
    /// is reported in the outcome, never as an error of the update.
    pub async fn update_status(
        &self,
        principal: &Principal,
        payload: UpdateStatusPayload,
    ) -> AppResult<StatusUpdateResponse> {
        require_admin_principal(principal)?;
        let admin_response = self
            .policy
            .normalize_admin_response(payload.admin_response.as_deref())?;

        let store = Arc::clone(&self.store);
        let (complaint_id, status) = (payload.complaint_id, payload.status);
        let response = admin_response.clone();
        let complaint = tokio::task::spawn_blocking(move || {
            store.update_complaint_status(RowScope::All, complaint_id, status, response.as_deref())
        })
        .await
        .map_err(|error| AppError::Internal(format!("status update task failed: {}", error)))??
        .ok_or_else(|| AppError::NotFound(format!("Complaint {} not found", complaint_id)))?;

        tracing::info!(
            complaint_id = %complaint.id,
            status = %complaint.status,
            responded = admin_response.is_some(),
            "complaint status updated"
        );

        let notification = self.notify(&complaint, admin_response.as_deref()).await;
        Ok(StatusUpdateResponse {
            complaint,
            notification,
        })
    }

    async fn notify(&self, complaint: &Complaint, message: Option<&str>) -> NotificationOutcome {
        let Some(relay) = self.relay.as_ref() else {
            return NotificationOutcome::Skipped;
        };
        let request = SmsRequest {
            to: Some(complaint.phone.clone()),
            complaint_id: Some(complaint.id.to_string()),
            status: Some(complaint.status.as_str().to_string()),
            message: message.map(ToString::to_string),
        };
        match relay.send(&request).await {
            Ok(receipt) => NotificationOutcome::Sent {
                message_id: receipt.message_id,
                status: receipt.status,
            },
            Err(error) => {
                tracing::warn!(
                    complaint_id = %complaint.id,
                    error = %self.redactor.redact(&error.to_string()),
                    "status notification failed"
                );
                NotificationOutcome::Failed {
                    error: error.detail().to_string(),
                }
            }
        }
    }

    /// Admins watch every record, citizens only their own.
    pub fn subscribe(&self, principal: &Principal) -> AppResult<Subscription> {
        let scope = match principal {
            Principal::Admin(_) => SubscriptionScope::All,
            Principal::Citizen(identity) => SubscriptionScope::Owner(identity.user_id),
            Principal::Anonymous => {
                return Err(AppError::Auth("Sign in to follow complaint updates".to_string()));
            }
        };
        Ok(Subscription::new(scope, self.store.subscribe_changes()))
    }

    /// Changes to the caller's own complaints, whatever their role.
    pub fn subscribe_own(&self, principal: &Principal) -> AppResult<Subscription> {
        let identity = principal
            .identity()
            .ok_or_else(|| AppError::Auth("Sign in to follow complaint updates".to_string()))?;
        Ok(Subscription::new(
            SubscriptionScope::Owner(identity.user_id),
            self.store.subscribe_changes(),
        ))
    }

    /// Live view of the caller's list: their own complaints, or for an admin
    /// every complaint matching `filter`.
    pub fn watch(&self, principal: &Principal, filter: ComplaintFilter) -> AppResult<LiveList> {
        let subscription = self.subscribe(principal)?;
        let service = self.clone();
        let principal = principal.clone();
        Ok(LiveList::spawn(subscription, move || {
            if principal.is_admin() {
                service.list_all(&principal, &filter)
            } else {
                service.list_own(&principal)
            }
        }))
    }
}

fn require_admin_principal(principal: &Principal) -> AppResult<()> {
    match principal {
        Principal::Admin(_) => Ok(()),
        Principal::Citizen(_) => Err(AppError::Policy(
            "Administrator access is required".to_string(),
        )),
        Principal::Anonymous => Err(AppError::Auth(
            "Sign in as an administrator".to_string(),
        )),
    }
}
