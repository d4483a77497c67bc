use crate::db::Database;
use crate::error::Error;
use crate::llm::ChatModel;
use crate::pipeline::greeting::GreetingDetector;
use crate::pipeline::state::{
    CheckedSql, GeneratedSql, ParsedQuestion, QuestionScope, Recommendation, ResultSet, Verdict,
    NOT_RELEVANT_APOLOGY,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Reply the generation stage uses to say it cannot write a query.
const NOT_ENOUGH_INFO: &str = "NOT_ENOUGH_INFO";

const PARSE_SYSTEM: &str = r#"You are a data analyst that can help summarize SQL tables and parse user questions about a database.
Given the question and database schema, identify the relevant tables and columns.
If the question is not relevant to the database or if there is not enough information to answer the question, set is_relevant to false.

Your response should be in the following JSON format:
{
    "is_relevant": boolean,
    "relevant_tables": [
        {
            "table_name": string,
            "columns": [string],
            "noun_columns": [string]
        }
    ]
}

The "noun_columns" field should contain only the columns that are relevant to the question and contain nouns or names, for example, the column "Artist name" contains nouns relevant to the question "What are the top selling artists?", but the column "Artist ID" is not relevant because it does not contain a noun. Do not include columns that contain numbers.

Only respond with the JSON."#;

const GENERATE_SYSTEM: &str = r#"You are an AI assistant that generates SQL queries based on user questions, database schema, and unique nouns found in the relevant tables. Generate a valid SQL query to answer the user's question.

If there is not enough information to write a SQL query, respond with "NOT_ENOUGH_INFO".

Here are some examples:

1. What is the best restaurant?
Answer: SELECT `name`, `rating`, `url` FROM `restaurants` ORDER BY `rating` DESC LIMIT 5

2. What is the restaurant with the worst rating in madrid?
Answer: SELECT `name`, `rating`, `url` FROM `restaurants` ORDER BY `rating` ASC LIMIT 5

3. What is the price range in the best restaurant?
Answer: SELECT `name` AS best_restaurant, `rating` AS highest_rating, `price_range` FROM `restaurants` WHERE `rating` = (SELECT MAX(`rating`) FROM `restaurants`)

SKIP ALL ROWS WHERE ANY COLUMN IS NULL or "N/A" or "".
Just give the query string. Do not format it. Make sure to use the correct spellings of nouns as provided in the unique nouns list. All the table and column names should be enclosed in backticks."#;

const VALIDATE_SYSTEM: &str = r#"You are an AI assistant that validates and fixes SQL queries. Your task is to:
1. Check if the SQL query is valid.
2. Ensure all table and column names are correctly spelled and exist in the schema. All the table and column names should be enclosed in backticks.
3. If there are any issues, fix them and provide the corrected SQL query.
4. If no issues are found, return the original query.

Respond in JSON format with the following structure. Only respond with the JSON:
{
    "valid": boolean,
    "issues": string or null,
    "corrected_query": string
}

For example:
1. {
    "valid": true,
    "issues": null,
    "corrected_query": "None"
}

2. {
    "valid": false,
    "issues": "Column USERS does not exist",
    "corrected_query": "SELECT * FROM `users` WHERE `age` > 25"
}

3. {
    "valid": false,
    "issues": "Column names and table names should be enclosed in backticks if they contain spaces or special characters",
    "corrected_query": "SELECT * FROM `gross income` WHERE `age` > 25"
}"#;

const FORMAT_SYSTEM: &str = "You are an AI assistant that formats database query results into a human-readable response. Give a conclusion to the user's question based on the query results. Do not give the answer in markdown format. Only give the answer in one line.";

const RECOMMEND_SYSTEM: &str = r#"You are an AI assistant that specializes in recommending restaurants. Based on the user's question, the SQL query, and the query results, provide the most accurate and suitable restaurant recommendation. If no recommendation fits, clearly state that no suitable option is available.

When making recommendations, consider these factors:
- Location: Prioritize restaurants near the specified area or region.
- Cuisine: Match the cuisine type or style the user is asking for (e.g., "Italian," "Vegan").
- Ratings: Favor restaurants with higher ratings or reviews if applicable.
- Price Range: Consider the price range based on the user's preferences or question.
- Special Requests: Address specific requirements like "family-friendly," "romantic atmosphere," or dietary preferences like "gluten-free."

Provide concise and actionable recommendations. Use the query results to support your answers when appropriate. Do NOT recommend a restaurant if the available data does not support it.

Respond in JSON format with the following structure. Only respond with the JSON:
{
    "recommendation": string,
    "reason": string,
    "top_choices": [
        {
            "name": string,
            "url": string,
            "description": string
        }
    ]
}

Set "recommendation" to "none" if no suitable option is available. "top_choices" is a ranked list of at most five entries drawn from the query results; leave it empty when the results do not support one."#;

/// The six prompt stages. Each method is a pure function from its inputs to a
/// new value; the orchestrator owns sequencing.
pub struct SqlAgent {
    llm: Arc<dyn ChatModel>,
    db: Database,
    greetings: GreetingDetector,
}

impl SqlAgent {
    pub fn new(llm: Arc<dyn ChatModel>, db: Database) -> Self {
        Self {
            llm,
            db,
            greetings: GreetingDetector::new(),
        }
    }

    pub async fn fetch_schema(&self) -> Result<String, Error> {
        self.db.schema_text().await
    }

    /// Parse the question against the schema. Greetings short-circuit before
    /// the model is ever called; a reply that is not the declared JSON shape
    /// aborts the request.
    pub async fn parse_question(
        &self,
        question: &str,
        schema: &str,
    ) -> Result<QuestionScope, Error> {
        if self.greetings.is_greeting(question) {
            info!("Greeting detected, skipping the model");
            return Ok(QuestionScope::Greeting);
        }

        let user = format!(
            "===Database schema:\n{}\n\n===User question:\n{}\n\nIdentify relevant tables and columns:",
            schema, question
        );

        let response = self
            .llm
            .complete(PARSE_SYSTEM, &user)
            .await
            .map_err(|e| Error::UpstreamModelFailure(e.to_string()))?;

        let parsed: ParsedQuestion = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| {
                Error::UpstreamModelFailure(format!(
                    "parse_question reply is not the expected JSON: {} - reply was: {}",
                    e, response
                ))
            })?;

        debug!("Parsed question: {:?}", parsed);

        if parsed.is_relevant {
            Ok(QuestionScope::Relevant(parsed))
        } else {
            Ok(QuestionScope::NotRelevant)
        }
    }

    /// SELECT DISTINCT over every noun column of every relevant table and
    /// collect the non-empty stringified cells. Used only to ground the
    /// generation prompt with exact spellings.
    pub async fn collect_unique_nouns(
        &self,
        parsed: &ParsedQuestion,
    ) -> Result<BTreeSet<String>, Error> {
        let mut nouns = BTreeSet::new();

        for table in &parsed.relevant_tables {
            if table.noun_columns.is_empty() {
                continue;
            }

            let column_list = table
                .noun_columns
                .iter()
                .map(|col| format!("`{}`", col))
                .collect::<Vec<_>>()
                .join(", ");
            let query = format!("SELECT DISTINCT {} FROM `{}`", column_list, table.table_name);

            let rows = self.db.run_query(query).await?;
            for row in rows {
                for cell in row.into_iter().flatten() {
                    if !cell.is_empty() {
                        nouns.insert(cell);
                    }
                }
            }
        }

        debug!("Unique nouns: {:?}", nouns);
        Ok(nouns)
    }

    /// Ask the model for one raw SQL statement. The NOT_ENOUGH_INFO reply
    /// maps to the internal not-relevant marker.
    pub async fn generate_sql(
        &self,
        question: &str,
        schema: &str,
        parsed: &ParsedQuestion,
        unique_nouns: &BTreeSet<String>,
    ) -> Result<GeneratedSql, Error> {
        let parsed_json = serde_json::to_string(parsed)
            .map_err(|e| Error::UpstreamModelFailure(e.to_string()))?;
        let nouns_json = serde_json::to_string(unique_nouns)
            .map_err(|e| Error::UpstreamModelFailure(e.to_string()))?;

        let user = format!(
            "===Database schema:\n{}\n\n===User question:\n{}\n\n===Relevant tables and columns:\n{}\n\n===Unique nouns in relevant tables:\n{}\n\nGenerate SQL query string",
            schema, question, parsed_json, nouns_json
        );

        let response = self
            .llm
            .complete(GENERATE_SYSTEM, &user)
            .await
            .map_err(|e| Error::UpstreamModelFailure(e.to_string()))?;

        let sql = strip_code_fences(&response).to_string();
        if sql == NOT_ENOUGH_INFO {
            info!("Model reported not enough information, marking question not relevant");
            return Ok(GeneratedSql::NotRelevant);
        }

        info!("Generated SQL: {}", sql);
        Ok(GeneratedSql::Query(sql))
    }

    /// Second model pass over the candidate query. A clean verdict keeps the
    /// query byte-identical; anything else replaces it wholesale with the
    /// corrected text. The sentinel passes through with no model call.
    pub async fn validate_sql(
        &self,
        schema: &str,
        generated: GeneratedSql,
    ) -> Result<CheckedSql, Error> {
        let sql = match generated {
            GeneratedSql::NotRelevant => {
                return Ok(CheckedSql {
                    sql: GeneratedSql::NotRelevant,
                    valid: false,
                    issues: None,
                })
            }
            GeneratedSql::Query(sql) => sql,
        };

        let user = format!(
            "===Database schema:\n{}\n\n===Generated SQL query:\n{}\n\nRespond in JSON format with the declared structure. Only respond with the JSON.",
            schema, sql
        );

        let response = self
            .llm
            .complete(VALIDATE_SYSTEM, &user)
            .await
            .map_err(|e| Error::UpstreamModelFailure(e.to_string()))?;

        let verdict: Verdict = serde_json::from_str(strip_code_fences(&response)).map_err(|e| {
            Error::UpstreamModelFailure(format!(
                "validate_sql reply is not the expected JSON: {} - reply was: {}",
                e, response
            ))
        })?;

        if verdict.valid && verdict.issues.is_none() {
            // Clean verdict: the query the executor sees is exactly the
            // query the validator saw.
            return Ok(CheckedSql {
                sql: GeneratedSql::Query(sql),
                valid: true,
                issues: None,
            });
        }

        // Any other verdict replaces the working query with the corrected
        // text, including the valid-with-issues combination.
        let corrected = verdict
            .corrected_query
            .filter(|text| !text.trim().is_empty() && text.trim() != "None")
            .ok_or_else(|| {
                Error::QueryInvalid(
                    verdict
                        .issues
                        .clone()
                        .unwrap_or_else(|| "validator rejected the query without a fix".to_string()),
                )
            })?;

        info!(
            "Validator replaced the query. Issues: {:?}",
            verdict.issues
        );

        Ok(CheckedSql {
            sql: GeneratedSql::Query(corrected),
            valid: verdict.valid,
            issues: verdict.issues,
        })
    }

    /// Run the working query. The sentinel never reaches the database.
    pub async fn execute_sql(&self, sql: &GeneratedSql) -> Result<ResultSet, Error> {
        match sql {
            GeneratedSql::NotRelevant => Ok(ResultSet::NotRelevant),
            GeneratedSql::Query(query) => {
                let rows = self.db.run_query(query.clone()).await?;
                Ok(ResultSet::Rows(rows))
            }
        }
    }

    /// One-line prose answer from the rows. The sentinel maps to the fixed
    /// apology, independent of the question.
    pub async fn format_results(
        &self,
        question: &str,
        results: &ResultSet,
    ) -> Result<String, Error> {
        let rows = match results {
            ResultSet::NotRelevant => return Ok(NOT_RELEVANT_APOLOGY.to_string()),
            ResultSet::Rows(rows) => rows,
        };

        let rows_json =
            serde_json::to_string(rows).map_err(|e| Error::UpstreamModelFailure(e.to_string()))?;
        let user = format!(
            "User question: {}\n\nQuery results: {}\n\nFormatted response:",
            question, rows_json
        );

        let answer = self
            .llm
            .complete(FORMAT_SYSTEM, &user)
            .await
            .map_err(|e| Error::UpstreamModelFailure(e.to_string()))?;

        Ok(answer.trim().to_string())
    }

    /// Structured recommendation from the rows, schema-validated. The
    /// sentinel maps to the fixed no-recommendation tuple.
    pub async fn choose_recommendation(
        &self,
        question: &str,
        sql: &GeneratedSql,
        results: &ResultSet,
    ) -> Result<Recommendation, Error> {
        let rows = match results {
            ResultSet::NotRelevant => return Ok(Recommendation::none()),
            ResultSet::Rows(rows) => rows,
        };

        let rows_json =
            serde_json::to_string(rows).map_err(|e| Error::UpstreamModelFailure(e.to_string()))?;
        let user = format!(
            "User question: {}\nSQL query: {}\nQuery results: {}\n\nRecommend a restaurant:",
            question,
            sql.text().unwrap_or(""),
            rows_json
        );

        let response = self
            .llm
            .complete(RECOMMEND_SYSTEM, &user)
            .await
            .map_err(|e| Error::UpstreamModelFailure(e.to_string()))?;

        let recommendation: Recommendation = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| {
                Error::UpstreamModelFailure(format!(
                    "choose_recommendation reply is not the expected JSON: {} - reply was: {}",
                    e, response
                ))
            })?;

        Ok(recommendation)
    }
}

/// Models often wrap replies in markdown fences even when told not to.
/// Returns the inner text, dropping an optional language tag.
pub(crate) fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };

    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::SqliteConnectionManager;
    use crate::llm::testing::ScriptedChat;
    use r2d2::Pool;

    fn seeded_agent(replies: Vec<&str>) -> (tempfile::TempDir, Arc<ScriptedChat>, SqlAgent) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");

        let conn = rusqlite::Connection::open(&path).expect("open");
        conn.execute_batch(
            "CREATE TABLE restaurants (name TEXT, rating REAL, price_range TEXT);
             INSERT INTO restaurants VALUES ('Casa Mono', 4.7, '$$');
             INSERT INTO restaurants VALUES ('El Rincon', 4.2, '$');
             INSERT INTO restaurants VALUES ('Casa Mono', 4.7, '$$');
             INSERT INTO restaurants VALUES (NULL, 2.0, '');",
        )
        .expect("seed");
        drop(conn);

        let manager = SqliteConnectionManager::new(path.to_string_lossy().to_string());
        let pool = Pool::builder().max_size(2).build(manager).expect("pool");

        let chat = Arc::new(ScriptedChat::new(replies));
        let agent = SqlAgent::new(chat.clone(), Database::new(pool));
        (dir, chat, agent)
    }

    fn parsed_restaurants() -> ParsedQuestion {
        ParsedQuestion {
            is_relevant: true,
            relevant_tables: vec![crate::pipeline::state::RelevantTable {
                table_name: "restaurants".to_string(),
                columns: vec!["name".to_string(), "rating".to_string()],
                noun_columns: vec!["name".to_string()],
            }],
        }
    }

    #[test]
    fn strips_plain_and_tagged_fences() {
        assert_eq!(strip_code_fences("SELECT 1"), "SELECT 1");
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\nSELECT 1\n```"), "SELECT 1");
    }

    #[tokio::test]
    async fn greeting_short_circuits_before_the_model() {
        let (_dir, chat, agent) = seeded_agent(vec![]);
        let scope = agent.parse_question("hola!", "`restaurants`: `name` TEXT").await.unwrap();
        assert!(matches!(scope, QuestionScope::Greeting));
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn parse_rejects_malformed_json() {
        let (_dir, _chat, agent) = seeded_agent(vec!["not json at all"]);
        let err = agent
            .parse_question("best restaurant?", "`restaurants`: `name` TEXT")
            .await
            .expect_err("must abort");
        assert!(matches!(err, Error::UpstreamModelFailure(_)));
    }

    #[tokio::test]
    async fn unique_nouns_skip_null_and_empty_cells() {
        let (_dir, _chat, agent) = seeded_agent(vec![]);
        let nouns = agent
            .collect_unique_nouns(&parsed_restaurants())
            .await
            .expect("nouns");

        let expected: BTreeSet<String> =
            ["Casa Mono", "El Rincon"].iter().map(|s| s.to_string()).collect();
        assert_eq!(nouns, expected);
    }

    #[tokio::test]
    async fn generate_maps_not_enough_info_to_sentinel() {
        let (_dir, _chat, agent) = seeded_agent(vec!["NOT_ENOUGH_INFO"]);
        let generated = agent
            .generate_sql("best?", "schema", &parsed_restaurants(), &BTreeSet::new())
            .await
            .expect("generated");
        assert_eq!(generated, GeneratedSql::NotRelevant);
    }

    #[tokio::test]
    async fn clean_verdict_keeps_query_byte_identical() {
        let (_dir, _chat, agent) = seeded_agent(vec![
            r#"{"valid": true, "issues": null, "corrected_query": "None"}"#,
        ]);
        let candidate = "SELECT `name` FROM `restaurants` ORDER BY `rating` DESC".to_string();
        let checked = agent
            .validate_sql("schema", GeneratedSql::Query(candidate.clone()))
            .await
            .expect("checked");

        assert!(checked.valid);
        assert_eq!(checked.issues, None);
        assert_eq!(checked.sql, GeneratedSql::Query(candidate));
    }

    #[tokio::test]
    async fn corrected_query_replaces_the_original_wholesale() {
        let (_dir, _chat, agent) = seeded_agent(vec![
            r#"{"valid": false, "issues": "Column nme does not exist", "corrected_query": "SELECT `name` FROM `restaurants`"}"#,
        ]);
        let checked = agent
            .validate_sql(
                "schema",
                GeneratedSql::Query("SELECT `nme` FROM `restaurants`".to_string()),
            )
            .await
            .expect("checked");

        assert!(!checked.valid);
        assert_eq!(checked.issues.as_deref(), Some("Column nme does not exist"));
        assert_eq!(
            checked.sql,
            GeneratedSql::Query("SELECT `name` FROM `restaurants`".to_string())
        );
    }

    #[tokio::test]
    async fn valid_with_issues_still_takes_the_corrected_query() {
        // A verdict that claims valid but lists issues counts as a rejection.
        let (_dir, _chat, agent) = seeded_agent(vec![
            r#"{"valid": true, "issues": "Identifiers not backticked", "corrected_query": "SELECT `name` FROM `restaurants`"}"#,
        ]);
        let checked = agent
            .validate_sql(
                "schema",
                GeneratedSql::Query("SELECT name FROM restaurants".to_string()),
            )
            .await
            .expect("checked");

        assert_eq!(
            checked.sql,
            GeneratedSql::Query("SELECT `name` FROM `restaurants`".to_string())
        );
    }

    #[tokio::test]
    async fn rejection_without_a_fix_is_query_invalid() {
        let (_dir, _chat, agent) = seeded_agent(vec![
            r#"{"valid": false, "issues": "Unintelligible query", "corrected_query": ""}"#,
        ]);
        let err = agent
            .validate_sql("schema", GeneratedSql::Query("garbage".to_string()))
            .await
            .expect_err("must reject");
        assert!(matches!(err, Error::QueryInvalid(_)));
    }

    #[tokio::test]
    async fn sentinel_skips_validation_execution_formatting_and_recommendation() {
        let (_dir, chat, agent) = seeded_agent(vec![]);

        let checked = agent
            .validate_sql("schema", GeneratedSql::NotRelevant)
            .await
            .expect("checked");
        assert_eq!(checked.sql, GeneratedSql::NotRelevant);
        assert!(!checked.valid);

        let results = agent.execute_sql(&checked.sql).await.expect("results");
        assert_eq!(results, ResultSet::NotRelevant);

        let answer = agent
            .format_results("anything at all", &results)
            .await
            .expect("answer");
        assert_eq!(answer, NOT_RELEVANT_APOLOGY);

        let recommendation = agent
            .choose_recommendation("anything", &checked.sql, &results)
            .await
            .expect("recommendation");
        assert!(recommendation.is_none());
        assert_eq!(
            recommendation.reason,
            crate::pipeline::state::NO_RECOMMENDATION_REASON
        );

        // None of the sentinel paths may touch the model.
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn recommendation_is_schema_validated_json() {
        let (_dir, _chat, agent) = seeded_agent(vec![
            r#"```json
{"recommendation": "Casa Mono", "reason": "Highest rating", "top_choices": [{"name": "Casa Mono", "url": "http://example.com", "description": "Tapas"}]}
```"#,
        ]);
        let results = ResultSet::Rows(vec![vec![Some("Casa Mono".to_string())]]);
        let recommendation = agent
            .choose_recommendation(
                "best?",
                &GeneratedSql::Query("SELECT 1".to_string()),
                &results,
            )
            .await
            .expect("recommendation");

        assert_eq!(recommendation.recommendation, "Casa Mono");
        assert_eq!(recommendation.top_choices.len(), 1);
        assert_eq!(recommendation.top_choices[0].name, "Casa Mono");
    }

    #[tokio::test]
    async fn recommendation_rejects_prose_replies() {
        let (_dir, _chat, agent) = seeded_agent(vec![
            "Recommended restaurant: Casa Mono\nReason: it is the best",
        ]);
        let results = ResultSet::Rows(vec![vec![Some("Casa Mono".to_string())]]);
        let err = agent
            .choose_recommendation(
                "best?",
                &GeneratedSql::Query("SELECT 1".to_string()),
                &results,
            )
            .await
            .expect_err("prose must fail closed");
        assert!(matches!(err, Error::UpstreamModelFailure(_)));
    }
}
