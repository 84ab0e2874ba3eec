use crate::errors::{AppError, AppResult};
use crate::models::{District, NewComplaint, Principal, ServiceCategory, SubmitComplaintPayload};
use std::str::FromStr;
use uuid::Uuid;

const MAX_FIELD_CHARS: usize = 200;
const MAX_TEXT_CHARS: usize = 5_000;

/// Form fields with their Malayalam and English labels, in form order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Name,
    Phone,
    Address,
    District,
    ServiceCategory,
    Description,
}

impl FormField {
    pub fn label_ml(self) -> &'static str {
        match self {
            Self::Name => "പേര്",
            Self::Phone => "ഫോൺ നമ്പർ",
            Self::Address => "വിലാസം",
            Self::District => "ജില്ല",
            Self::ServiceCategory => "സേവന വിഭാഗം",
            Self::Description => "പരാതിയുടെ വിവരണം",
        }
    }

    pub fn label_en(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Phone => "Phone Number",
            Self::Address => "Address",
            Self::District => "District",
            Self::ServiceCategory => "Service Category",
            Self::Description => "Complaint Description",
        }
    }

    fn max_chars(self) -> usize {
        match self {
            Self::Address | Self::Description => MAX_TEXT_CHARS,
            _ => MAX_FIELD_CHARS,
        }
    }

    fn required_message(self) -> String {
        format!("{} ആവശ്യമാണ് ({} is required)", self.label_ml(), self.label_en())
    }

    fn invalid_message(self, value: &str) -> String {
        format!(
            "{} അസാധുവാണ് ({} '{}' is not a recognised option)",
            self.label_ml(),
            self.label_en(),
            value
        )
    }

    fn too_long_message(self) -> String {
        format!(
            "{} വളരെ ദൈർഘ്യമേറിയതാണ് ({} must be at most {} characters)",
            self.label_ml(),
            self.label_en(),
            self.max_chars()
        )
    }
}

/// Checks a public-form submission before anything touches the store.
#[derive(Debug, Clone, Default)]
pub struct SubmissionPolicy;

impl SubmissionPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, payload: &SubmitComplaintPayload, submitter: &Principal) -> AppResult<NewComplaint> {
        let name = required_text(FormField::Name, &payload.name)?;
        let phone = required_text(FormField::Phone, &payload.phone)?;
        let address = required_text(FormField::Address, &payload.address)?;
        let district_raw = required_text(FormField::District, &payload.district)?;
        let category_raw = required_text(FormField::ServiceCategory, &payload.service_category)?;
        let description = required_text(FormField::Description, &payload.description)?;

        let district = District::from_str(&district_raw)
            .map_err(|_| AppError::Validation(FormField::District.invalid_message(&district_raw)))?;
        let service_category = ServiceCategory::from_str(&category_raw)
            .map_err(|_| AppError::Validation(FormField::ServiceCategory.invalid_message(&category_raw)))?;

        let (user_id, user_email) = match submitter.identity() {
            Some(identity) => (identity.user_id, identity.email.clone()),
            None => (Uuid::nil(), String::new()),
        };

        Ok(NewComplaint {
            name,
            phone,
            address,
            district,
            service_category,
            description,
            user_id,
            user_email,
        })
    }

    /// A blank response means "leave the current response as it is".
    pub fn normalize_admin_response(&self, response: Option<&str>) -> AppResult<Option<String>> {
        let Some(response) = response.map(str::trim).filter(|response| !response.is_empty()) else {
            return Ok(None);
        };
        if response.chars().count() > MAX_TEXT_CHARS {
            return Err(AppError::Validation(format!(
                "Admin response must be at most {} characters",
                MAX_TEXT_CHARS
            )));
        }
        Ok(Some(response.to_string()))
    }
}

fn required_text(field: FormField, raw: &str) -> AppResult<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(AppError::Validation(field.required_message()));
    }
    if value.chars().count() > field.max_chars() {
        return Err(AppError::Validation(field.too_long_message()));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::SubmissionPolicy;
    use crate::errors::AppError;
    use crate::models::{District, Identity, Principal, ServiceCategory, SubmitComplaintPayload};
    use uuid::Uuid;

    fn payload() -> SubmitComplaintPayload {
        SubmitComplaintPayload {
            name: " Rahul ".to_string(),
            phone: "9447000000".to_string(),
            address: "Near bus stand, Kalpetta".to_string(),
            district: "Wayanad".to_string(),
            service_category: "Road Maintenance (PWD)".to_string(),
            description: "Pothole on the main road".to_string(),
        }
    }

    #[test]
    fn anonymous_submitter_gets_sentinel_owner() {
        let complaint = SubmissionPolicy::new()
            .validate(&payload(), &Principal::Anonymous)
            .expect("valid");
        assert_eq!(complaint.user_id, Uuid::nil());
        assert_eq!(complaint.user_email, "");
        assert_eq!(complaint.name, "Rahul");
        assert_eq!(complaint.district, District::Wayanad);
        assert_eq!(complaint.service_category, ServiceCategory::RoadMaintenance);
    }

    #[test]
    fn citizen_submitter_is_recorded_as_owner() {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            email: "rahul@example.org".to_string(),
        };
        let complaint = SubmissionPolicy::new()
            .validate(&payload(), &Principal::Citizen(identity.clone()))
            .expect("valid");
        assert_eq!(complaint.user_id, identity.user_id);
        assert_eq!(complaint.user_email, identity.email);
    }

    #[test]
    fn every_required_field_is_checked() {
        let policy = SubmissionPolicy::new();
        let blanks: Vec<fn(&mut SubmitComplaintPayload)> = vec![
            |p| p.name.clear(),
            |p| p.phone = "   ".to_string(),
            |p| p.address.clear(),
            |p| p.district.clear(),
            |p| p.service_category.clear(),
            |p| p.description.clear(),
        ];
        for blank in blanks {
            let mut candidate = payload();
            blank(&mut candidate);
            let error = policy
                .validate(&candidate, &Principal::Anonymous)
                .expect_err("blank field rejected");
            assert!(matches!(error, AppError::Validation(_)));
            assert!(error.detail().contains("is required"));
        }
    }

    #[test]
    fn unknown_district_is_a_validation_error() {
        let mut candidate = payload();
        candidate.district = "Chennai".to_string();
        let error = SubmissionPolicy::new()
            .validate(&candidate, &Principal::Anonymous)
            .expect_err("rejected");
        assert!(error.detail().contains("District 'Chennai'"));
    }

    #[test]
    fn blank_admin_response_is_treated_as_absent() {
        let policy = SubmissionPolicy::new();
        assert_eq!(policy.normalize_admin_response(Some("  ")).expect("ok"), None);
        assert_eq!(policy.normalize_admin_response(None).expect("ok"), None);
        assert_eq!(
            policy.normalize_admin_response(Some(" Fixed ")).expect("ok").as_deref(),
            Some("Fixed")
        );
    }
}
