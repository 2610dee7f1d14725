//! Severity and treatment policy shared by every classifier strategy.

use super::analysis_model::SeverityLevel;

/// Treatment guidance for one diagnosis category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreatmentAdvice {
    pub treatment: String,
    pub recommendations: Vec<String>,
}

struct CatalogEntry {
    /// Lowercase fragments matched against the classifier label.
    aliases: &'static [&'static str],
    treatment: &'static str,
    recommendations: &'static [&'static str],
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        aliases: &["cbb", "bacterial blight"],
        treatment: "Avoid excess humidity, rotate crops and remove affected stems",
        recommendations: &[
            "Use disease-free cuttings",
            "Rotate crops",
            "Disinfect tools after use",
        ],
    },
    CatalogEntry {
        aliases: &["cbsd", "brown streak"],
        treatment: "Plant tolerant varieties and uproot infected plants",
        recommendations: &[
            "Plant tolerant varieties",
            "Monitor regularly",
            "Harvest early in affected fields",
        ],
    },
    CatalogEntry {
        aliases: &["cgm", "green mite"],
        treatment: "Introduce natural predators and keep plants well watered",
        recommendations: &[
            "Encourage predatory mites",
            "Monitor during the dry season",
            "Remove heavily infested leaves",
        ],
    },
    CatalogEntry {
        aliases: &["cmd", "mosaic"],
        treatment: "Use resistant plants, eliminate infected plants",
        recommendations: &[
            "Isolate infected plants",
            "Apply preventive treatment",
            "Monitor regularly",
        ],
    },
    CatalogEntry {
        aliases: &["healthy"],
        treatment: "No treatment needed",
        recommendations: &["Keep monitoring the field", "Maintain good field hygiene"],
    },
];

const GENERIC_TREATMENT: &str = "Consult an agricultural expert";
const GENERIC_RECOMMENDATIONS: &[&str] = &[
    "Consult an agricultural expert",
    "Isolate the affected plants",
    "Take another photo in good light",
];

/// Severity from label and confidence.
///
/// Healthy leaves are always `Low`; otherwise confidence above 0.8 is `High`,
/// above 0.6 is `Moderate`.
pub fn derive_severity(label: &str, confidence: f64) -> SeverityLevel {
    if label.to_lowercase().contains("healthy") {
        return SeverityLevel::Low;
    }
    if confidence > 0.8 {
        SeverityLevel::High
    } else if confidence > 0.6 {
        SeverityLevel::Moderate
    } else {
        SeverityLevel::Low
    }
}

pub fn treatment_for(label: &str) -> TreatmentAdvice {
    let lower = label.to_lowercase();
    let entry = CATALOG
        .iter()
        .find(|entry| entry.aliases.iter().any(|alias| contains_word(&lower, alias)));

    match entry {
        Some(entry) => TreatmentAdvice {
            treatment: entry.treatment.to_string(),
            recommendations: entry.recommendations.iter().map(|s| s.to_string()).collect(),
        },
        None => TreatmentAdvice {
            treatment: GENERIC_TREATMENT.to_string(),
            recommendations: GENERIC_RECOMMENDATIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        },
    }
}

// Short codes like "cmd" must not match inside longer words.
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack
        .match_indices(needle)
        .any(|(start, matched)| {
            let before = haystack[..start].chars().next_back();
            let after = haystack[start + matched.len()..].chars().next();
            !before.is_some_and(|c| c.is_alphanumeric()) && !after.is_some_and(|c| c.is_alphanumeric())
        })
}
