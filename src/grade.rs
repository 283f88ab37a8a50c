use serde::{Deserialize, Serialize};

/// Two grade tables are in active use: the coarse one on spreadsheet and
/// JSON reports, the fine one on board-style result cards. Callers pick the
/// policy per report via the `grading` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradePolicy {
    #[default]
    Coarse,
    Fine,
}

const COARSE_BANDS: [(f64, &str); 5] = [
    (90.0, "A+"),
    (80.0, "A"),
    (70.0, "B"),
    (60.0, "C"),
    (50.0, "D"),
];

const FINE_BANDS: [(f64, &str); 9] = [
    (95.0, "A++"),
    (90.0, "A+"),
    (85.0, "A"),
    (80.0, "B++"),
    (75.0, "B+"),
    (70.0, "B"),
    (60.0, "C"),
    (50.0, "D"),
    (40.0, "U"),
];

impl GradePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "coarse" => Some(GradePolicy::Coarse),
            "fine" => Some(GradePolicy::Fine),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GradePolicy::Coarse => "coarse",
            GradePolicy::Fine => "fine",
        }
    }

    pub fn grade(self, percentage: f64) -> &'static str {
        let bands: &[(f64, &'static str)] = match self {
            GradePolicy::Coarse => &COARSE_BANDS,
            GradePolicy::Fine => &FINE_BANDS,
        };
        for &(threshold, label) in bands {
            if percentage >= threshold {
                return label;
            }
        }
        "F"
    }
}
