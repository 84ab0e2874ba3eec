use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum District {
    Thiruvananthapuram,
    Kollam,
    Pathanamthitta,
    Alappuzha,
    Kottayam,
    Idukki,
    Ernakulam,
    Thrissur,
    Palakkad,
    Malappuram,
    Kozhikode,
    Wayanad,
    Kannur,
    Kasaragod,
}

impl District {
    pub const ALL: [District; 14] = [
        Self::Thiruvananthapuram,
        Self::Kollam,
        Self::Pathanamthitta,
        Self::Alappuzha,
        Self::Kottayam,
        Self::Idukki,
        Self::Ernakulam,
        Self::Thrissur,
        Self::Palakkad,
        Self::Malappuram,
        Self::Kozhikode,
        Self::Wayanad,
        Self::Kannur,
        Self::Kasaragod,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thiruvananthapuram => "Thiruvananthapuram",
            Self::Kollam => "Kollam",
            Self::Pathanamthitta => "Pathanamthitta",
            Self::Alappuzha => "Alappuzha",
            Self::Kottayam => "Kottayam",
            Self::Idukki => "Idukki",
            Self::Ernakulam => "Ernakulam",
            Self::Thrissur => "Thrissur",
            Self::Palakkad => "Palakkad",
            Self::Malappuram => "Malappuram",
            Self::Kozhikode => "Kozhikode",
            Self::Wayanad => "Wayanad",
            Self::Kannur => "Kannur",
            Self::Kasaragod => "Kasaragod",
        }
    }
}

impl FromStr for District {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|district| district.as_str() == raw)
            .ok_or_else(|| AppError::Validation(format!("Unknown district '{}'", raw)))
    }
}

impl fmt::Display for District {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceCategory {
    #[serde(rename = "Water Supply (Kerala Water Authority)")]
    WaterSupply,
    #[serde(rename = "Electricity (KSEB)")]
    Electricity,
    #[serde(rename = "Road Maintenance (PWD)")]
    RoadMaintenance,
    #[serde(rename = "Waste Management")]
    WasteManagement,
    #[serde(rename = "Public Transport (KSRTC)")]
    PublicTransport,
    #[serde(rename = "Healthcare (Kerala Health Services)")]
    Healthcare,
    #[serde(rename = "Education")]
    Education,
    #[serde(rename = "Agriculture")]
    Agriculture,
    #[serde(rename = "Social Welfare")]
    SocialWelfare,
    #[serde(rename = "Revenue Department")]
    RevenueDepartment,
    #[serde(rename = "Civil Supplies")]
    CivilSupplies,
    #[serde(rename = "Police")]
    Police,
    #[serde(rename = "Local Self Government")]
    LocalSelfGovernment,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 13] = [
        Self::WaterSupply,
        Self::Electricity,
        Self::RoadMaintenance,
        Self::WasteManagement,
        Self::PublicTransport,
        Self::Healthcare,
        Self::Education,
        Self::Agriculture,
        Self::SocialWelfare,
        Self::RevenueDepartment,
        Self::CivilSupplies,
        Self::Police,
        Self::LocalSelfGovernment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WaterSupply => "Water Supply (Kerala Water Authority)",
            Self::Electricity => "Electricity (KSEB)",
            Self::RoadMaintenance => "Road Maintenance (PWD)",
            Self::WasteManagement => "Waste Management",
            Self::PublicTransport => "Public Transport (KSRTC)",
            Self::Healthcare => "Healthcare (Kerala Health Services)",
            Self::Education => "Education",
            Self::Agriculture => "Agriculture",
            Self::SocialWelfare => "Social Welfare",
            Self::RevenueDepartment => "Revenue Department",
            Self::CivilSupplies => "Civil Supplies",
            Self::Police => "Police",
            Self::LocalSelfGovernment => "Local Self Government",
        }
    }
}

impl FromStr for ServiceCategory {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == raw)
            .ok_or_else(|| AppError::Validation(format!("Unknown service category '{}'", raw)))
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Pending,
    InProgress,
    Resolved,
    Rejected,
}

impl ComplaintStatus {
    pub const ALL: [ComplaintStatus; 4] = [Self::Pending, Self::InProgress, Self::Resolved, Self::Rejected];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for ComplaintStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "rejected" => Ok(Self::Rejected),
            other => Err(AppError::Validation(format!("Unknown complaint status '{}'", other))),
        }
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Complaint {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub address: String,
    pub district: District,
    pub service_category: ServiceCategory,
    pub description: String,
    pub user_id: Uuid,
    pub user_email: String,
    pub status: ComplaintStatus,
    pub admin_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields as typed into the public form. Enumerated fields stay raw strings
/// until the submission policy has checked them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitComplaintPayload {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub district: String,
    pub service_category: String,
    pub description: String,
}

/// A submission that passed validation, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComplaint {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub district: District,
    pub service_category: ServiceCategory,
    pub description: String,
    pub user_id: Uuid,
    pub user_email: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintFilter {
    pub district: Option<District>,
    pub status: Option<ComplaintStatus>,
    pub category: Option<ServiceCategory>,
}

impl ComplaintFilter {
    pub fn matches(&self, complaint: &Complaint) -> bool {
        self.district.map_or(true, |district| complaint.district == district)
            && self.status.map_or(true, |status| complaint.status == status)
            && self.category.map_or(true, |category| complaint.service_category == category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatusPayload {
    pub complaint_id: Uuid,
    pub status: ComplaintStatus,
    pub admin_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum NotificationOutcome {
    Skipped,
    #[serde(rename_all = "camelCase")]
    Sent { message_id: String, status: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateResponse {
    pub complaint: Complaint,
    pub notification: NotificationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
}

/// Who is asking. Resolved once per request and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Principal {
    Anonymous,
    Citizen(Identity),
    Admin(Identity),
}

impl Principal {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Anonymous => None,
            Self::Citizen(identity) | Self::Admin(identity) => Some(identity),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub complaint_id: Uuid,
    pub user_id: Uuid,
    pub has_admin_response: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub principal: Principal,
}

/// Body accepted by the SMS relay. Every field is optional on the wire so a
/// missing value surfaces as a relay error instead of a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmsRequest {
    pub to: Option<String>,
    pub complaint_id: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsReceipt {
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SmsResponse {
    #[serde(rename_all = "camelCase")]
    Sent {
        success: bool,
        message_id: String,
        status: String,
    },
    Failed {
        success: bool,
        error: String,
    },
}

impl SmsResponse {
    pub fn sent(receipt: SmsReceipt) -> Self {
        Self::Sent {
            success: true,
            message_id: receipt.message_id,
            status: receipt.status,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            success: false,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ComplaintStatus, District, ServiceCategory};
    use std::str::FromStr;

    #[test]
    fn enumerations_parse_their_own_storage_strings() {
        for district in District::ALL {
            assert_eq!(District::from_str(district.as_str()).expect("district"), district);
        }
        for category in ServiceCategory::ALL {
            assert_eq!(ServiceCategory::from_str(category.as_str()).expect("category"), category);
        }
        for status in ComplaintStatus::ALL {
            assert_eq!(ComplaintStatus::from_str(status.as_str()).expect("status"), status);
        }
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(District::from_str("Chennai").is_err());
        assert!(ServiceCategory::from_str("Electricity").is_err());
        assert!(ComplaintStatus::from_str("closed").is_err());
        assert!(ComplaintStatus::from_str("").is_err());
    }

    #[test]
    fn category_serializes_with_display_label() {
        let raw = serde_json::to_string(&ServiceCategory::Electricity).expect("serialize");
        assert_eq!(raw, "\"Electricity (KSEB)\"");
        let status = serde_json::to_string(&ComplaintStatus::InProgress).expect("serialize");
        assert_eq!(status, "\"in_progress\"");
    }
}
