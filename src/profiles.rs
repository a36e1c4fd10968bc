// Copyright (c), lang2fhir-agent contributors
// SPDX-License-Identifier: Apache-2.0

// Embedded profile registry and patient-scoping classification table.

use serde::Deserialize;
use std::collections::HashMap;

lazy_static::lazy_static! {
    /// Profile registry and scoping table, compiled in from profiles.yaml
    /// so every deployment agrees on which resource types are
    /// patient-bound.
    pub static ref PROFILES: ProfileRegistry = {
        let raw_str = include_str!("profiles.yaml");
        let raw: ProfileRegistryRaw = serde_yaml::from_str(raw_str)
            .expect("Failed to parse profiles.yaml");
        ProfileRegistry::try_from(raw)
            .expect("Invalid profiles.yaml")
    };
}

/// How a resource type binds to a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatientScoping {
    /// `subject.reference = Patient/{id}`.
    Subject,
    /// Appointment-style participant array.
    Participant,
    /// Both `subject` and `patient` references (Encounter).
    Patient,
    /// No patient reference required.
    None,
}

#[derive(Debug, Deserialize)]
struct ProfileRegistryRaw {
    profiles: HashMap<String, String>,
    patient_scoping: HashMap<String, PatientScoping>,
}

/// Validated registry: every profile's resource type must have a scoping
/// entry, so a successful translation can always be classified.
#[derive(Debug)]
pub struct ProfileRegistry {
    profiles: HashMap<String, String>,
    patient_scoping: HashMap<String, PatientScoping>,
}

impl TryFrom<ProfileRegistryRaw> for ProfileRegistry {
    type Error = String;

    fn try_from(raw: ProfileRegistryRaw) -> Result<Self, Self::Error> {
        for (profile, resource_type) in &raw.profiles {
            if !raw.patient_scoping.contains_key(resource_type) {
                return Err(format!(
                    "profile {profile} maps to {resource_type}, which has no patient_scoping entry"
                ));
            }
        }
        Ok(ProfileRegistry {
            profiles: raw.profiles,
            patient_scoping: raw.patient_scoping,
        })
    }
}

impl ProfileRegistry {
    /// Base FHIR resource type for a lang2fhir profile id.
    pub fn resource_type(&self, profile: &str) -> Option<&str> {
        self.profiles.get(profile).map(String::as_str)
    }

    /// Scoping rule for a resource type; `None` means the type is
    /// unsupported, not that it is unscoped.
    pub fn scoping(&self, resource_type: &str) -> Option<PatientScoping> {
        self.patient_scoping.get(resource_type).copied()
    }

    pub fn profile_ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

/// Keyword rules for picking a profile from free text, checked in order.
/// First match wins.
const PROFILE_RULES: &[(&str, &[&str])] = &[
    ("appointment", &["appointment", "book ", "reschedule", "visit on "]),
    (
        "medicationrequest",
        &["prescri", "medication", "refill", " dose", "mg of "],
    ),
    (
        "vital-signs",
        &[
            "blood pressure",
            "heart rate",
            "temperature",
            "respiratory rate",
            "oxygen saturation",
            "vital",
        ],
    ),
    ("observation-lab", &["lab result", "lab value", "a1c", "cholesterol", " panel"]),
    ("careplan", &["care plan", "treatment goal"]),
    ("procedure", &["procedure", "surgery", "biopsy"]),
    ("coverage", &["coverage", "insurance", "payer"]),
    ("invoice", &["invoice", "billed", "bill for"]),
    ("encounter", &["encounter", "admitted", "discharged"]),
    ("questionnaireresponse", &["questionnaire response", "filled out"]),
    ("questionnaire", &["questionnaire", "intake form", "survey"]),
    ("patient", &["new patient", "register patient", "demographics"]),
    ("schedule", &["schedule for dr", "weekly schedule"]),
    ("slot", &["open slot", "free slot"]),
];

/// Fallback when no rule matches; encounter diagnoses are the most common
/// dictated create.
pub const DEFAULT_PROFILE: &str = "condition-encounter-diagnosis";

/// Pick a lang2fhir profile for a create request that did not name one.
/// This is a heuristic; callers that need determinism pass the profile
/// explicitly.
pub fn infer_profile(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    for (profile, markers) in PROFILE_RULES {
        if markers.iter().any(|marker| lowered.contains(marker)) {
            return profile;
        }
    }
    DEFAULT_PROFILE
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_registry_loads() {
        assert_eq!(PROFILES.profile_ids().count(), 18);
        assert_eq!(
            PROFILES.resource_type("condition-encounter-diagnosis"),
            Some("Condition")
        );
        assert_eq!(PROFILES.resource_type("vital-signs"), Some("Observation"));
        assert_eq!(PROFILES.resource_type("nope"), None);
    }

    #[test]
    fn test_every_profile_type_has_scoping() {
        for profile in PROFILES.profile_ids() {
            let resource_type = PROFILES.resource_type(profile).unwrap();
            assert!(
                PROFILES.scoping(resource_type).is_some(),
                "{resource_type} missing from patient_scoping"
            );
        }
    }

    #[test]
    fn test_scoping_rules() {
        assert_eq!(PROFILES.scoping("Condition"), Some(PatientScoping::Subject));
        assert_eq!(
            PROFILES.scoping("Appointment"),
            Some(PatientScoping::Participant)
        );
        assert_eq!(PROFILES.scoping("Encounter"), Some(PatientScoping::Patient));
        assert_eq!(PROFILES.scoping("Patient"), Some(PatientScoping::None));
        // Absent from the table entirely: unsupported, not unscoped.
        assert_eq!(PROFILES.scoping("Medication"), None);
    }

    #[test]
    fn test_infer_profile() {
        assert_eq!(
            infer_profile("Book an appointment with Dr. Smith tomorrow at 2pm"),
            "appointment"
        );
        assert_eq!(
            infer_profile("Prescribed 500 mg of amoxicillin twice daily"),
            "medicationrequest"
        );
        assert_eq!(
            infer_profile("Blood pressure 120/80, heart rate 72"),
            "vital-signs"
        );
        assert_eq!(
            infer_profile("Patient has severe asthma with acute exacerbation"),
            DEFAULT_PROFILE
        );
    }

    #[test]
    fn test_inferred_profiles_are_registered() {
        for (profile, _) in PROFILE_RULES {
            assert!(
                PROFILES.resource_type(profile).is_some(),
                "{profile} not in registry"
            );
        }
        assert!(PROFILES.resource_type(DEFAULT_PROFILE).is_some());
    }
}
