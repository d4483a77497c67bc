use crate::error::Error;
use crate::pipeline::agent::SqlAgent;
use crate::pipeline::state::{
    CheckedSql, GeneratedSql, QueryOutcome, QuestionScope, Recommendation, ResultSet,
    EXECUTION_FALLBACK, FORMATTING_FALLBACK,
};
use tracing::{error, info};

/// The canonical stage graph, collapsed from the original's divergent drafts:
///
///   parse_question -> collect_unique_nouns -> generate_sql
///     -> validate_sql -> execute_sql -> { format_results, choose_recommendation }
///
/// Edges are unconditional; the not-relevant sentinel flows through the tail
/// stages rather than rerouting them, and the two final stages fan out after
/// execution.
pub struct Workflow {
    agent: SqlAgent,
}

impl Workflow {
    pub fn new(agent: SqlAgent) -> Self {
        Self { agent }
    }

    /// Run one question through the full pipeline. Each stage consumes the
    /// previous stages' outputs and produces a new value; nothing is shared
    /// or mutated across stages.
    pub async fn answer(&self, question: &str, session_id: &str) -> Result<QueryOutcome, Error> {
        info!(session = session_id, "Answering question: {}", question);

        let schema = self.agent.fetch_schema().await?;

        let scope = self.agent.parse_question(question, &schema).await?;
        let generated = match scope {
            QuestionScope::Greeting => return Ok(QueryOutcome::casual()),
            QuestionScope::NotRelevant => GeneratedSql::NotRelevant,
            QuestionScope::Relevant(parsed) => {
                let unique_nouns = self.agent.collect_unique_nouns(&parsed).await?;
                self.agent
                    .generate_sql(question, &schema, &parsed, &unique_nouns)
                    .await?
            }
        };

        let checked = self.agent.validate_sql(&schema, generated).await?;

        let results = match self.agent.execute_sql(&checked.sql).await {
            Ok(results) => results,
            Err(e) => {
                // Execution failures end the question with a fallback answer
                // instead of crashing the request.
                error!("Query execution failed: {}", e);
                return Ok(execution_failed_outcome(checked, e));
            }
        };

        // Fan-out: both final stages read the same result set.
        let (answer, recommendation) = tokio::join!(
            self.agent.format_results(question, &results),
            self.agent
                .choose_recommendation(question, &checked.sql, &results),
        );

        let mut stage_error = None;
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                error!("Formatting failed: {}", e);
                stage_error = Some(e.to_string());
                FORMATTING_FALLBACK.to_string()
            }
        };
        let recommendation = match recommendation {
            Ok(recommendation) => recommendation,
            Err(e) => {
                error!("Recommendation failed: {}", e);
                stage_error.get_or_insert(e.to_string());
                Recommendation::unavailable()
            }
        };

        Ok(QueryOutcome {
            sql: checked.sql.text().map(str::to_string),
            sql_valid: checked.valid,
            sql_issues: checked.issues,
            rows: match results {
                ResultSet::Rows(rows) => Some(rows),
                ResultSet::NotRelevant => None,
            },
            answer,
            recommendation,
            error: stage_error,
        })
    }
}

fn execution_failed_outcome(checked: CheckedSql, error: Error) -> QueryOutcome {
    QueryOutcome {
        sql: checked.sql.text().map(str::to_string),
        sql_valid: checked.valid,
        sql_issues: checked.issues,
        rows: None,
        answer: EXECUTION_FALLBACK.to_string(),
        recommendation: Recommendation::unavailable(),
        error: Some(error.to_string()),
    }
}
