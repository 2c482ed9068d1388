use db::models::{
    form::{Form, FormStatus},
    question::Question,
};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("form not found")]
    NotFound,
    #[error("only the form owner can change this form")]
    NotOwner,
    #[error("a closed form cannot be published")]
    Closed,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct FormWithQuestions {
    #[serde(flatten)]
    #[ts(flatten)]
    pub form: Form,
    pub questions: Vec<Question>,
}

#[derive(Clone)]
pub struct FormService {
    pool: SqlitePool,
}

impl FormService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, form_id: Uuid) -> Result<FormWithQuestions, FormError> {
        let form = Form::find_by_id(&self.pool, form_id)
            .await?
            .ok_or(FormError::NotFound)?;
        let questions = Question::find_by_form_id(&self.pool, form_id).await?;
        Ok(FormWithQuestions { form, questions })
    }

    pub async fn list_owned(&self, owner_id: Uuid) -> Result<Vec<Form>, FormError> {
        Ok(Form::find_by_owner_id(&self.pool, owner_id).await?)
    }

    /// Draft to published. Publishing twice is a no-op.
    pub async fn publish(&self, caller: Uuid, form_id: Uuid) -> Result<Form, FormError> {
        let form = Form::find_by_id(&self.pool, form_id)
            .await?
            .ok_or(FormError::NotFound)?;
        if form.owner_id != caller {
            return Err(FormError::NotOwner);
        }
        match form.status {
            FormStatus::Published => return Ok(form),
            FormStatus::Closed => return Err(FormError::Closed),
            FormStatus::Draft => {}
        }

        Form::update_status(&self.pool, form_id, FormStatus::Published).await?;
        info!(form_id = %form_id, owner_id = %caller, "Form published");
        Form::find_by_id(&self.pool, form_id)
            .await?
            .ok_or(FormError::NotFound)
    }
}
