// libs/consultation-cell/src/services/templates.rs
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::ConsultationError;
use crate::models::{ConsultationTemplate, ResponseKind, StepResponse, TemplateStep};

pub const GENERAL_INTAKE: &str = "general-intake";
pub const FOLLOW_UP_CHECK: &str = "follow-up-check";

/// Templates available to structured consultations, keyed by id
pub struct TemplateRegistry {
    templates: HashMap<String, ConsultationTemplate>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TemplateRegistry {
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for template in [general_intake(), follow_up_check()] {
            registry.templates.insert(template.id.clone(), template);
        }
        registry
    }

    /// Add or replace a template. Rejects templates without steps or with
    /// duplicate step ids, and choice steps without options.
    pub fn register(&mut self, template: ConsultationTemplate) -> Result<(), ConsultationError> {
        if template.steps.is_empty() {
            return Err(ConsultationError::StructuredConsultationFailed(format!(
                "template {} has no steps",
                template.id
            )));
        }

        let mut seen = HashSet::new();
        for step in &template.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(ConsultationError::StructuredConsultationFailed(format!(
                    "template {} repeats step id {}",
                    template.id, step.id
                )));
            }
            if let ResponseKind::SingleChoice { options } = &step.kind {
                if options.is_empty() {
                    return Err(ConsultationError::StructuredConsultationFailed(format!(
                        "step {} offers no choices",
                        step.id
                    )));
                }
            }
        }

        info!("Registered consultation template {} ({} steps)", template.id, template.steps.len());
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    pub fn get(&self, template_id: &str) -> Option<&ConsultationTemplate> {
        self.templates.get(template_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Check a response against the step's declared kind
pub fn validate_response(step: &TemplateStep, response: &StepResponse) -> Result<(), ConsultationError> {
    let invalid = |reason: String| ConsultationError::InvalidStepResponse {
        step_id: step.id.clone(),
        reason,
    };

    match (&step.kind, response) {
        (ResponseKind::FreeText, StepResponse::Text(text)) => {
            if step.required && text.trim().is_empty() {
                return Err(invalid("answer must not be empty".to_string()));
            }
        }
        (ResponseKind::YesNo, StepResponse::YesNo(_)) => {}
        (ResponseKind::Number { min, max }, StepResponse::Number(value)) => {
            if !value.is_finite() {
                return Err(invalid("not a finite number".to_string()));
            }
            if let Some(min) = min {
                if value < min {
                    return Err(invalid(format!("{} is below the minimum of {}", value, min)));
                }
            }
            if let Some(max) = max {
                if value > max {
                    return Err(invalid(format!("{} is above the maximum of {}", value, max)));
                }
            }
        }
        (ResponseKind::SingleChoice { options }, StepResponse::Choice(choice)) => {
            if !options.iter().any(|o| o == choice) {
                return Err(invalid(format!("'{}' is not one of {:?}", choice, options)));
            }
        }
        (kind, _) => {
            return Err(invalid(format!("expected a {} answer", kind_name(kind))));
        }
    }

    Ok(())
}

fn kind_name(kind: &ResponseKind) -> &'static str {
    match kind {
        ResponseKind::FreeText => "text",
        ResponseKind::YesNo => "yes/no",
        ResponseKind::Number { .. } => "numeric",
        ResponseKind::SingleChoice { .. } => "single-choice",
    }
}

fn choices(options: &[&str]) -> ResponseKind {
    ResponseKind::SingleChoice {
        options: options.iter().map(|o| o.to_string()).collect(),
    }
}

fn general_intake() -> ConsultationTemplate {
    ConsultationTemplate {
        id: GENERAL_INTAKE.to_string(),
        name: "General intake".to_string(),
        steps: vec![
            TemplateStep::required("chief-complaint", "What brings you in today?", ResponseKind::FreeText),
            TemplateStep::required(
                "symptom-duration-days",
                "How many days have you had these symptoms?",
                ResponseKind::Number { min: Some(0.0), max: Some(3650.0) },
            ),
            TemplateStep::required(
                "pain-level",
                "Rate your pain from 0 (none) to 10 (worst).",
                ResponseKind::Number { min: Some(0.0), max: Some(10.0) },
            ),
            TemplateStep::required("has-fever", "Do you currently have a fever?", ResponseKind::YesNo),
            TemplateStep::optional(
                "current-medications",
                "List any medications you are taking.",
                ResponseKind::FreeText,
            ),
            TemplateStep::required(
                "severity",
                "How severe would you say this is?",
                choices(&["mild", "moderate", "severe"]),
            ),
        ],
    }
}

fn follow_up_check() -> ConsultationTemplate {
    ConsultationTemplate {
        id: FOLLOW_UP_CHECK.to_string(),
        name: "Follow-up check".to_string(),
        steps: vec![
            TemplateStep::required(
                "symptoms-improved",
                "Have your symptoms improved since the last visit?",
                ResponseKind::YesNo,
            ),
            TemplateStep::required(
                "adherence",
                "Have you taken your treatment as prescribed?",
                choices(&["fully", "partially", "not-at-all"]),
            ),
            TemplateStep::optional("side-effects", "Describe any side effects.", ResponseKind::FreeText),
            TemplateStep::optional("new-concerns", "Anything new you want to raise?", ResponseKind::FreeText),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn builtins_are_registered() {
        let registry = TemplateRegistry::with_builtins();
        assert_eq!(registry.ids(), vec![FOLLOW_UP_CHECK, GENERAL_INTAKE]);
        assert_eq!(registry.get(GENERAL_INTAKE).unwrap().steps.len(), 6);
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let mut registry = TemplateRegistry::empty();
        let step = TemplateStep::required("q1", "Question?", ResponseKind::YesNo);
        let template = ConsultationTemplate {
            id: "dup".to_string(),
            name: "Duplicate".to_string(),
            steps: vec![step.clone(), step],
        };

        assert_matches!(
            registry.register(template),
            Err(ConsultationError::StructuredConsultationFailed(_))
        );
        assert!(registry.get("dup").is_none());
    }

    #[test]
    fn number_range_is_enforced() {
        let step = TemplateStep::required("pain", "Pain?", ResponseKind::Number { min: Some(0.0), max: Some(10.0) });

        assert!(validate_response(&step, &StepResponse::Number(7.0)).is_ok());
        assert!(validate_response(&step, &StepResponse::Number(10.0)).is_ok());
        assert_matches!(
            validate_response(&step, &StepResponse::Number(11.0)),
            Err(ConsultationError::InvalidStepResponse { .. })
        );
        assert!(validate_response(&step, &StepResponse::Number(f64::NAN)).is_err());
    }

    #[test]
    fn mismatched_kind_is_rejected() {
        let step = TemplateStep::required("fever", "Fever?", ResponseKind::YesNo);
        let err = validate_response(&step, &StepResponse::Text("yes".to_string())).unwrap_err();
        assert!(err.to_string().contains("yes/no"));
    }

    #[test]
    fn choice_must_be_listed() {
        let step = TemplateStep::required("severity", "Severity?", choices(&["mild", "severe"]));
        assert!(validate_response(&step, &StepResponse::Choice("mild".to_string())).is_ok());
        assert!(validate_response(&step, &StepResponse::Choice("extreme".to_string())).is_err());
    }

    #[test]
    fn blank_text_only_allowed_when_optional() {
        let required = TemplateStep::required("cc", "Complaint?", ResponseKind::FreeText);
        let optional = TemplateStep::optional("notes", "Notes?", ResponseKind::FreeText);
        let blank = StepResponse::Text("   ".to_string());

        assert!(validate_response(&required, &blank).is_err());
        assert!(validate_response(&optional, &blank).is_ok());
    }
}
