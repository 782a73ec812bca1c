//! REST resources exposed by the GITDM API

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A collection endpoint of the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    Patients,
    Encounters,
    LabResults,
    MedicationOrders,
    ClinicalReferences,
    AiSummaries,
    Alerts,
}

/// Returned when a name matches no resource
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource '{0}' (expected one of: {names})", names = Resource::names())]
pub struct UnknownResource(pub String);

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Patients,
        Resource::Encounters,
        Resource::LabResults,
        Resource::MedicationOrders,
        Resource::ClinicalReferences,
        Resource::AiSummaries,
        Resource::Alerts,
    ];

    /// URL path segment under the API base
    pub fn path(self) -> &'static str {
        match self {
            Self::Patients => "patients",
            Self::Encounters => "encounters",
            Self::LabResults => "labs",
            Self::MedicationOrders => "meds",
            Self::ClinicalReferences => "refs",
            Self::AiSummaries => "ai-summaries",
            Self::Alerts => "alerts",
        }
    }

    /// Segment used in query cache keys
    pub fn cache_segment(self) -> &'static str {
        match self {
            Self::Patients => "patients",
            Self::Encounters => "encounters",
            Self::LabResults => "lab-results",
            Self::MedicationOrders => "medication-orders",
            Self::ClinicalReferences => "clinical-references",
            Self::AiSummaries => "ai-summaries",
            Self::Alerts => "alerts",
        }
    }

    fn names() -> String {
        Self::ALL
            .iter()
            .map(|r| r.cache_segment())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_segment())
    }
}

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_matches('/').to_ascii_lowercase().replace('_', "-");
        let alias = match name.as_str() {
            "medications" => Some(Self::MedicationOrders),
            "references" => Some(Self::ClinicalReferences),
            _ => None,
        };
        alias
            .or_else(|| {
                Self::ALL
                    .into_iter()
                    .find(|r| r.path() == name || r.cache_segment() == name)
            })
            .ok_or_else(|| UnknownResource(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_and_cache_names() {
        assert_eq!("labs".parse::<Resource>(), Ok(Resource::LabResults));
        assert_eq!("lab-results".parse::<Resource>(), Ok(Resource::LabResults));
        assert_eq!("lab_results".parse::<Resource>(), Ok(Resource::LabResults));
        assert_eq!("/meds/".parse::<Resource>(), Ok(Resource::MedicationOrders));
        assert_eq!("Medications".parse::<Resource>(), Ok(Resource::MedicationOrders));
        assert_eq!("refs".parse::<Resource>(), Ok(Resource::ClinicalReferences));
        assert_eq!("AI-Summaries".parse::<Resource>(), Ok(Resource::AiSummaries));
    }

    #[test]
    fn unknown_names_list_the_choices() {
        let err = "billing".parse::<Resource>().unwrap_err();
        assert_eq!(err, UnknownResource("billing".to_string()));
        assert!(err.to_string().contains("medication-orders"));
    }

    #[test]
    fn every_resource_parses_from_its_own_names() {
        for resource in Resource::ALL {
            assert_eq!(resource.path().parse::<Resource>(), Ok(resource));
            assert_eq!(resource.to_string().parse::<Resource>(), Ok(resource));
        }
    }
}
