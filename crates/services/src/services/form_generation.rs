//! Natural-language form generation.
//!
//! The model returns a schema; nothing is written until that schema has been
//! validated, and the form is then inserted together with its questions in a
//! single transaction. A timeout, a malformed schema or a failed insert leaves
//! no rows behind.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::models::{
    form::{CreateForm, Form, FormStatus},
    profile::Profile,
    question::{CreateQuestion, Question, QuestionKind},
};
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use super::{
    forms::FormWithQuestions,
    llm_client::{LlmClient, LlmError},
    rate_limit::{RateLimitError, RateLimiter},
    reward::advertised_reward,
};

pub const MIN_PROMPT_CHARS: usize = 10;
pub const MAX_PROMPT_CHARS: usize = 1000;
const MAX_QUESTIONS: usize = 50;

const SYSTEM_PROMPT: &str = r#"You design survey forms. Reply with a single JSON object and nothing else:
{
  "title": string,
  "description": string,
  "category": string,
  "estimated_time": integer minutes >= 1,
  "difficulty": integer 1-10,
  "questions": [
    {
      "type": "short_text" | "long_text" | "single_choice" | "multiple_choice" | "rating" | "scale" | "yes_no",
      "title": string,
      "required": boolean,
      "options": array of strings for single_choice and multiple_choice, otherwise omit or use an object such as {"min": 1, "max": 5}
    }
  ]
}"#;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedQuestion {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedForm {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub estimated_time: i64,
    pub difficulty: i64,
    pub questions: Vec<GeneratedQuestion>,
}

/// Anything that can turn a prompt into a form schema
#[async_trait]
pub trait FormSchemaGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedForm, LlmError>;
}

#[async_trait]
impl FormSchemaGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<GeneratedForm, LlmError> {
        self.ask_json(prompt, Some(SYSTEM_PROMPT)).await
    }
}

#[derive(Debug, Error)]
pub enum FormGenerationError {
    #[error("prompt must be between 10 and 1000 characters")]
    InvalidPrompt,
    #[error("form generation is not configured")]
    Unavailable,
    #[error("profile not found")]
    ProfileNotFound,
    #[error("too many generation requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("form generation timed out")]
    Timeout,
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("generated schema is invalid: {0}")]
    InvalidSchema(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<RateLimitError> for FormGenerationError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Exceeded { retry_after_secs } => {
                FormGenerationError::RateLimited { retry_after_secs }
            }
            RateLimitError::Database(e) => FormGenerationError::Database(e),
        }
    }
}

/// A schema that passed validation, ready to insert
#[derive(Debug, Clone)]
pub struct ValidatedForm {
    pub form: CreateForm,
    pub questions: Vec<CreateQuestion>,
}

pub fn validate_prompt(prompt: &str) -> Result<&str, FormGenerationError> {
    let prompt = prompt.trim();
    let chars = prompt.chars().count();
    if !(MIN_PROMPT_CHARS..=MAX_PROMPT_CHARS).contains(&chars) {
        return Err(FormGenerationError::InvalidPrompt);
    }
    Ok(prompt)
}

pub fn validate_schema(
    owner_id: Uuid,
    generated: GeneratedForm,
) -> Result<ValidatedForm, FormGenerationError> {
    let invalid = FormGenerationError::InvalidSchema;

    let title = generated.title.trim().to_string();
    if title.is_empty() {
        return Err(invalid("title is empty".to_string()));
    }
    let estimated_time = i32::try_from(generated.estimated_time)
        .ok()
        .filter(|minutes| *minutes >= 1)
        .ok_or_else(|| invalid(format!("estimated_time {} is below 1", generated.estimated_time)))?;
    let difficulty = i32::try_from(generated.difficulty)
        .ok()
        .filter(|d| (1..=10).contains(d))
        .ok_or_else(|| invalid(format!("difficulty {} is outside 1-10", generated.difficulty)))?;
    if generated.questions.is_empty() {
        return Err(invalid("no questions".to_string()));
    }
    if generated.questions.len() > MAX_QUESTIONS {
        return Err(invalid(format!("more than {MAX_QUESTIONS} questions")));
    }

    let mut questions = Vec::with_capacity(generated.questions.len());
    for (index, question) in generated.questions.into_iter().enumerate() {
        let kind: QuestionKind = question
            .kind
            .parse()
            .map_err(|_| invalid(format!("question {index} has unknown type {:?}", question.kind)))?;
        let question_title = question.title.trim().to_string();
        if question_title.is_empty() {
            return Err(invalid(format!("question {index} has no title")));
        }
        if kind.requires_options() {
            let has_choices = question
                .options
                .as_ref()
                .and_then(Value::as_array)
                .is_some_and(|choices| !choices.is_empty());
            if !has_choices {
                return Err(invalid(format!("question {index} ({kind}) needs options")));
            }
        }
        questions.push(CreateQuestion {
            kind,
            title: question_title,
            required: question.required,
            options: question.options.filter(|options| !options.is_null()),
        });
    }

    let non_empty = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(ValidatedForm {
        form: CreateForm {
            owner_id,
            title,
            description: non_empty(generated.description),
            category: non_empty(generated.category),
            estimated_time,
            difficulty,
            reward: advertised_reward(estimated_time, difficulty),
            status: Some(FormStatus::Draft),
        },
        questions,
    })
}

#[derive(Clone)]
pub struct FormGenerationService {
    pool: SqlitePool,
    generator: Option<Arc<dyn FormSchemaGenerator>>,
    rate_limiter: RateLimiter,
    timeout: Duration,
}

impl FormGenerationService {
    pub fn new(
        pool: SqlitePool,
        generator: Option<Arc<dyn FormSchemaGenerator>>,
        rate_limiter: RateLimiter,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            generator,
            rate_limiter,
            timeout,
        }
    }

    pub async fn generate(
        &self,
        owner_id: Uuid,
        prompt: &str,
        now: DateTime<Utc>,
    ) -> Result<FormWithQuestions, FormGenerationError> {
        let prompt = validate_prompt(prompt)?;
        let generator = self
            .generator
            .as_ref()
            .ok_or(FormGenerationError::Unavailable)?;
        if Profile::find_by_id(&self.pool, owner_id).await?.is_none() {
            return Err(FormGenerationError::ProfileNotFound);
        }
        self.rate_limiter
            .check(&format!("generate:{owner_id}"), now)
            .await?;

        let generated = tokio::time::timeout(self.timeout, generator.generate(prompt))
            .await
            .map_err(|_| {
                error!(
                    owner_id = %owner_id,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Form generation timed out"
                );
                FormGenerationError::Timeout
            })??;
        let validated = validate_schema(owner_id, generated)?;

        let created = self.insert(&validated).await?;
        info!(
            form_id = %created.form.id,
            owner_id = %owner_id,
            questions = created.questions.len(),
            "Form generated"
        );
        Ok(created)
    }

    async fn insert(&self, validated: &ValidatedForm) -> Result<FormWithQuestions, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let form = Form::create(&mut tx, Uuid::new_v4(), &validated.form).await?;
        let mut questions = Vec::with_capacity(validated.questions.len());
        for (position, question) in validated.questions.iter().enumerate() {
            questions.push(Question::create(&mut tx, form.id, position as i32, question).await?);
        }
        tx.commit().await?;
        Ok(FormWithQuestions { form, questions })
    }
}

#[cfg(test)]
mod tests {
    use db::DBService;
    use serde_json::json;

    use super::*;
    use crate::services::test_support::user_with_balance;

    struct FixedGenerator(Value);

    #[async_trait]
    impl FormSchemaGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedForm, LlmError> {
            serde_json::from_value(self.0.clone()).map_err(|e| LlmError::Output(e.to_string()))
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl FormSchemaGenerator for SlowGenerator {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedForm, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(LlmError::Timeout)
        }
    }

    fn coffee_schema() -> Value {
        json!({
            "title": "Coffee habits",
            "description": "How do you take your coffee?",
            "category": "lifestyle",
            "estimated_time": 3,
            "difficulty": 2,
            "questions": [
                {"type": "yes_no", "title": "Do you drink coffee?", "required": true},
                {"type": "single_choice", "title": "Favourite brew", "required": false,
                 "options": ["Espresso", "Filter", "Cold brew"]},
                {"type": "rating", "title": "Rate your local cafe", "options": {"min": 1, "max": 5}}
            ]
        })
    }

    async fn service(
        db: &DBService,
        generator: Arc<dyn FormSchemaGenerator>,
        limit: u32,
        timeout: Duration,
    ) -> FormGenerationService {
        FormGenerationService::new(
            db.pool.clone(),
            Some(generator),
            RateLimiter::new(db.pool.clone(), limit, Duration::from_secs(3600)),
            timeout,
        )
    }

    async fn form_count(db: &DBService) -> i64 {
        Form::count_all(&db.pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_generates_draft_form_with_questions() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = user_with_balance(&db.pool, 100).await;
        let generation = service(
            &db,
            Arc::new(FixedGenerator(coffee_schema())),
            10,
            Duration::from_secs(5),
        )
        .await;

        let created = generation
            .generate(owner, "A short survey about coffee", Utc::now())
            .await
            .unwrap();
        assert_eq!(created.form.status, FormStatus::Draft);
        assert_eq!(created.form.reward, 10 + 3 * 2 + 2 * 5);
        assert_eq!(created.questions.len(), 3);
        assert_eq!(created.questions[1].kind, QuestionKind::SingleChoice);
        assert_eq!(
            created.questions[1].parsed_options(),
            Some(json!(["Espresso", "Filter", "Cold brew"]))
        );
        assert_eq!(created.questions[2].position, 2);
    }

    #[test]
    fn test_prompt_length_is_validated() {
        assert!(validate_prompt("too short").is_err());
        assert!(validate_prompt("long enough!").is_ok());
        assert!(validate_prompt(&"x".repeat(1001)).is_err());
        assert!(validate_prompt(&"x".repeat(1000)).is_ok());
    }

    #[tokio::test]
    async fn test_missing_generator_is_unavailable() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = user_with_balance(&db.pool, 100).await;
        let generation = FormGenerationService::new(
            db.pool.clone(),
            None,
            RateLimiter::new(db.pool.clone(), 10, Duration::from_secs(3600)),
            Duration::from_secs(5),
        );
        let err = generation
            .generate(owner, "A short survey about coffee", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FormGenerationError::Unavailable));
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_form() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = user_with_balance(&db.pool, 100).await;
        let generation =
            service(&db, Arc::new(SlowGenerator), 10, Duration::from_millis(50)).await;

        let err = generation
            .generate(owner, "A short survey about coffee", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FormGenerationError::Timeout));
        assert_eq!(form_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_invalid_schema_leaves_no_form() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = user_with_balance(&db.pool, 100).await;
        let mut schema = coffee_schema();
        schema["questions"][1]["options"] = json!([]);
        let generation =
            service(&db, Arc::new(FixedGenerator(schema)), 10, Duration::from_secs(5)).await;

        let err = generation
            .generate(owner, "A short survey about coffee", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FormGenerationError::InvalidSchema(_)));
        assert_eq!(form_count(&db).await, 0);
    }

    #[test]
    fn test_schema_bounds() {
        let owner = Uuid::new_v4();
        let parse = |value: Value| -> GeneratedForm { serde_json::from_value(value).unwrap() };

        let mut schema = coffee_schema();
        schema["difficulty"] = json!(11);
        assert!(validate_schema(owner, parse(schema)).is_err());

        let mut schema = coffee_schema();
        schema["estimated_time"] = json!(0);
        assert!(validate_schema(owner, parse(schema)).is_err());

        let mut schema = coffee_schema();
        schema["questions"][0]["type"] = json!("signature");
        assert!(validate_schema(owner, parse(schema)).is_err());

        let mut schema = coffee_schema();
        schema["questions"] = json!([]);
        assert!(validate_schema(owner, parse(schema)).is_err());

        let mut schema = coffee_schema();
        schema["title"] = json!("   ");
        assert!(validate_schema(owner, parse(schema)).is_err());
    }

    #[tokio::test]
    async fn test_failed_question_insert_rolls_back_form() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = user_with_balance(&db.pool, 100).await;
        sqlx::query(
            r#"CREATE TRIGGER reject_third_question BEFORE INSERT ON questions
               WHEN NEW.position = 2
               BEGIN SELECT RAISE(ABORT, 'rejected'); END"#,
        )
        .execute(&db.pool)
        .await
        .unwrap();
        let generation = service(
            &db,
            Arc::new(FixedGenerator(coffee_schema())),
            10,
            Duration::from_secs(5),
        )
        .await;

        let err = generation
            .generate(owner, "A short survey about coffee", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FormGenerationError::Database(_)));
        assert_eq!(form_count(&db).await, 0);
        let questions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(questions, 0);
    }

    #[tokio::test]
    async fn test_generation_is_rate_limited_per_user() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = user_with_balance(&db.pool, 100).await;
        let generation = service(
            &db,
            Arc::new(FixedGenerator(coffee_schema())),
            1,
            Duration::from_secs(5),
        )
        .await;
        let now = Utc::now();

        generation
            .generate(owner, "A short survey about coffee", now)
            .await
            .unwrap();
        let err = generation
            .generate(owner, "A short survey about tea", now)
            .await
            .unwrap_err();
        assert!(matches!(err, FormGenerationError::RateLimited { .. }));
        assert_eq!(form_count(&db).await, 1);
    }
}
