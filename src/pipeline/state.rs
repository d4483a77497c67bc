use crate::db::Row;
use serde::{Deserialize, Serialize};

/// Canned reply for casual greetings. Sent without touching the model.
pub const CASUAL_REPLY: &str =
    "Hi! I'm the restaurant guide. Ask me anything about the restaurants I know - ratings, prices, cuisines or locations.";

/// Fixed apology for questions outside the database's scope.
pub const NOT_RELEVANT_APOLOGY: &str = "Sorry, I can only give answers relevant to the database.";

/// Fallback answer when query execution fails.
pub const EXECUTION_FALLBACK: &str =
    "Sorry, I ran into a problem while looking that up. Please try again in a moment.";

/// Fallback answer when the model fails while phrasing the results.
pub const FORMATTING_FALLBACK: &str =
    "I found the data but could not phrase an answer. Please try again.";

pub const NO_RECOMMENDATION_REASON: &str = "No recommendation needed for irrelevant questions.";

/// Structured judgment from the parse stage. Produced once per question,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedQuestion {
    pub is_relevant: bool,
    #[serde(default)]
    pub relevant_tables: Vec<RelevantTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevantTable {
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub noun_columns: Vec<String>,
}

/// Outcome of the parse stage, including the two short-circuit branches.
#[derive(Debug, Clone)]
pub enum QuestionScope {
    Greeting,
    NotRelevant,
    Relevant(ParsedQuestion),
}

/// The working query after generation: real SQL text, or the reserved
/// not-relevant marker that short-circuits the remaining SQL stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedSql {
    Query(String),
    NotRelevant,
}

impl GeneratedSql {
    pub fn text(&self) -> Option<&str> {
        match self {
            GeneratedSql::Query(sql) => Some(sql),
            GeneratedSql::NotRelevant => None,
        }
    }
}

/// Raw validation verdict as the model reports it.
#[derive(Debug, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    #[serde(default)]
    pub issues: Option<String>,
    #[serde(default)]
    pub corrected_query: Option<String>,
}

/// The working query after validation, with the verdict attached.
#[derive(Debug, Clone)]
pub struct CheckedSql {
    pub sql: GeneratedSql,
    pub valid: bool,
    pub issues: Option<String>,
}

/// Rows from the executor, or the sentinel carried through from generation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
    Rows(Vec<Row>),
    NotRelevant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedPlace {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Structured recommendation, schema-validated out of the model's JSON reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommendation: String,
    pub reason: String,
    #[serde(default)]
    pub top_choices: Vec<RecommendedPlace>,
}

impl Recommendation {
    /// The fixed no-recommendation tuple for out-of-scope questions.
    pub fn none() -> Self {
        Self {
            recommendation: "none".to_string(),
            reason: NO_RECOMMENDATION_REASON.to_string(),
            top_choices: Vec::new(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            recommendation: "none".to_string(),
            reason: "No suitable recommendation available.".to_string(),
            top_choices: Vec::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.recommendation.eq_ignore_ascii_case("none")
    }
}

/// Final record for one question, assembled from the per-stage outputs.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub sql: Option<String>,
    pub sql_valid: bool,
    pub sql_issues: Option<String>,
    pub rows: Option<Vec<Row>>,
    pub answer: String,
    pub recommendation: Recommendation,
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn casual() -> Self {
        Self {
            sql: None,
            sql_valid: false,
            sql_issues: None,
            rows: None,
            answer: CASUAL_REPLY.to_string(),
            recommendation: Recommendation::none(),
            error: None,
        }
    }
}
