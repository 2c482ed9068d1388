use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// The seven question kinds a generated schema may use
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display,
)]
#[sqlx(type_name = "question_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuestionKind {
    ShortText,
    LongText,
    SingleChoice,
    MultipleChoice,
    Rating,
    Scale,
    YesNo,
}

impl QuestionKind {
    pub fn requires_options(self) -> bool {
        matches!(self, QuestionKind::SingleChoice | QuestionKind::MultipleChoice)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Question {
    pub id: Uuid,
    pub form_id: Uuid,
    pub position: i32,
    pub kind: QuestionKind,
    pub title: String,
    pub required: bool,
    pub options: Option<String>, // JSON, type-specific
}

impl Question {
    pub fn parsed_options(&self) -> Option<serde_json::Value> {
        self.options
            .as_ref()
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateQuestion {
    pub kind: QuestionKind,
    pub title: String,
    pub required: bool,
    pub options: Option<serde_json::Value>,
}

const QUESTION_COLUMNS: &str = "id, form_id, position, kind, title, required, options";

impl Question {
    pub async fn create(
        conn: &mut SqliteConnection,
        form_id: Uuid,
        position: i32,
        data: &CreateQuestion,
    ) -> Result<Self, sqlx::Error> {
        let options = data.options.as_ref().map(|value| value.to_string());
        sqlx::query_as::<_, Question>(&format!(
            r#"INSERT INTO questions (id, form_id, position, kind, title, required, options)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {QUESTION_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(form_id)
        .bind(position)
        .bind(data.kind)
        .bind(&data.title)
        .bind(data.required)
        .bind(options)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_form_id<'e, E>(executor: E, form_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Question>(&format!(
            r#"SELECT {QUESTION_COLUMNS}
               FROM questions
               WHERE form_id = $1
               ORDER BY position ASC"#
        ))
        .bind(form_id)
        .fetch_all(executor)
        .await
    }
}
