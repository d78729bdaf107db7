//! # Filter Builder
//!
//! ## Responsibility
//! Turns the optional criteria a caller supplies (`state`, `gender`,
//! `diagnosis`, `age_min`, `age_max`) into a conjunction of predicates.
//!
//! ## Guarantees
//! - Only supplied, non-empty criteria produce a predicate
//! - No criteria at all matches every row
//! - The SQL rendering and the in-memory [`ParticipantFilter::matches`] agree
//! - Values are bound as parameters, never spliced into SQL text

use rusqlite::types::Value;

use crate::models::Participant;

// ---------------------------------------------------------------------------
// Dimension
// ---------------------------------------------------------------------------

/// A field a chart endpoint groups rows by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Gender,
    State,
    Age,
    Diagnosis,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Gender,
        Dimension::State,
        Dimension::Age,
        Dimension::Diagnosis,
    ];

    /// Column name in the `participants` table.
    pub fn column(self) -> &'static str {
        match self {
            Dimension::Gender => "gender",
            Dimension::State => "state",
            Dimension::Age => "age",
            Dimension::Diagnosis => "diagnosis",
        }
    }

    /// Query parameters that constrain this dimension.
    pub fn filter_params(self) -> &'static [&'static str] {
        match self {
            Dimension::Gender => &["gender"],
            Dimension::State => &["state"],
            Dimension::Age => &["age_min", "age_max"],
            Dimension::Diagnosis => &["diagnosis"],
        }
    }

    pub fn from_path_segment(s: &str) -> Option<Self> {
        match s {
            "gender" => Some(Dimension::Gender),
            "state" => Some(Dimension::State),
            "age" => Some(Dimension::Age),
            "diagnosis" => Some(Dimension::Diagnosis),
            _ => None,
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// One active criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    StateIs(String),
    GenderIs(String),
    DiagnosisIs(String),
    AgeAtLeast(i64),
    AgeAtMost(i64),
}

impl Predicate {
    fn sql(&self) -> &'static str {
        match self {
            Predicate::StateIs(_) => "state = ?",
            Predicate::GenderIs(_) => "gender = ?",
            Predicate::DiagnosisIs(_) => "diagnosis = ?",
            Predicate::AgeAtLeast(_) => "age >= ?",
            Predicate::AgeAtMost(_) => "age <= ?",
        }
    }

    fn value(&self) -> Value {
        match self {
            Predicate::StateIs(s) | Predicate::GenderIs(s) | Predicate::DiagnosisIs(s) => {
                Value::Text(s.clone())
            }
            Predicate::AgeAtLeast(n) | Predicate::AgeAtMost(n) => Value::Integer(*n),
        }
    }

    pub fn matches(&self, p: &Participant) -> bool {
        match self {
            Predicate::StateIs(s) => p.state == *s,
            Predicate::GenderIs(g) => p.gender == *g,
            Predicate::DiagnosisIs(d) => p.diagnosis == *d,
            Predicate::AgeAtLeast(n) => p.age >= *n,
            Predicate::AgeAtMost(n) => p.age <= *n,
        }
    }
}

// ---------------------------------------------------------------------------
// ParticipantFilter
// ---------------------------------------------------------------------------

/// Optional criteria shared by every read operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantFilter {
    pub state: Option<String>,
    pub gender: Option<String>,
    pub diagnosis: Option<String>,
    pub age_min: Option<i64>,
    pub age_max: Option<i64>,
}

impl ParticipantFilter {
    /// A filter that matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn diagnosis(mut self, diagnosis: impl Into<String>) -> Self {
        self.diagnosis = Some(diagnosis.into());
        self
    }

    pub fn age_min(mut self, age: i64) -> Self {
        self.age_min = Some(age);
        self
    }

    pub fn age_max(mut self, age: i64) -> Self {
        self.age_max = Some(age);
        self
    }

    /// The same filter with every criterion on `dim` dropped.
    pub fn without(mut self, dim: Dimension) -> Self {
        match dim {
            Dimension::Gender => self.gender = None,
            Dimension::State => self.state = None,
            Dimension::Diagnosis => self.diagnosis = None,
            Dimension::Age => {
                self.age_min = None;
                self.age_max = None;
            }
        }
        self
    }

    /// Active predicates, in a fixed order.
    pub fn predicates(&self) -> Vec<Predicate> {
        let text = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_owned);

        let mut out = Vec::with_capacity(5);
        if let Some(s) = text(&self.state) {
            out.push(Predicate::StateIs(s));
        }
        if let Some(g) = text(&self.gender) {
            out.push(Predicate::GenderIs(g));
        }
        if let Some(d) = text(&self.diagnosis) {
            out.push(Predicate::DiagnosisIs(d));
        }
        if let Some(n) = self.age_min {
            out.push(Predicate::AgeAtLeast(n));
        }
        if let Some(n) = self.age_max {
            out.push(Predicate::AgeAtMost(n));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.predicates().is_empty()
    }

    /// Render as `" WHERE a = ? AND b >= ?"` (or `""`) plus the bound values.
    pub fn where_clause(&self) -> (String, Vec<Value>) {
        let preds = self.predicates();
        if preds.is_empty() {
            return (String::new(), Vec::new());
        }
        let sql = preds.iter().map(Predicate::sql).collect::<Vec<_>>().join(" AND ");
        let values = preds.iter().map(Predicate::value).collect();
        (format!(" WHERE {sql}"), values)
    }

    pub fn matches(&self, p: &Participant) -> bool {
        self.predicates().iter().all(|pred| pred.matches(p))
    }
}
