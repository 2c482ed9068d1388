//! Response submission and the completion reward it may earn.

use chrono::{DateTime, Utc};
use db::models::{
    credits_ledger::{LedgerEntry, NewLedgerEntry},
    form::{Form, FormStatus},
    form_response::{CreateFormResponse, FormResponse},
    profile::Profile,
    question::Question,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};
use ts_rs::TS;
use uuid::Uuid;

use super::{
    ledger::{LedgerError, LedgerService},
    reward::{self, RewardDecision, RewardInput},
};

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("form not found")]
    FormNotFound,
    #[error("form is not accepting responses")]
    FormNotOpen,
    #[error("answers must be a JSON object keyed by question id")]
    AnswersNotObject,
    #[error("required question {0} was not answered")]
    MissingAnswer(Uuid),
    #[error("duration must not be negative")]
    NegativeDuration,
    #[error("profile not found")]
    ProfileNotFound,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct SubmitResponse {
    pub answers: Value,
    pub duration_sec: i64,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct SubmitOutcome {
    pub response: FormResponse,
    pub quality_score: f64,
    pub rewarded_credits: i64,
    /// Respondent balance after the submission; None for anonymous respondents
    pub balance: Option<i64>,
}

#[derive(Clone)]
pub struct ResponseService {
    pool: SqlitePool,
}

impl ResponseService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a response and, when it qualifies, credit the respondent in the
    /// same transaction. A response that does not qualify is stored without a
    /// reward; that is not an error.
    pub async fn submit(
        &self,
        respondent: Option<Uuid>,
        form_id: Uuid,
        submission: &SubmitResponse,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, ResponseError> {
        if submission.duration_sec < 0 {
            return Err(ResponseError::NegativeDuration);
        }
        let form = Form::find_by_id(&self.pool, form_id)
            .await?
            .ok_or(ResponseError::FormNotFound)?;
        if form.status != FormStatus::Published {
            return Err(ResponseError::FormNotOpen);
        }
        let questions = Question::find_by_form_id(&self.pool, form_id).await?;
        check_required_answers(&questions, &submission.answers)?;

        // respondent_id references profiles; callers bootstrap before answering
        if let Some(user_id) = respondent {
            if Profile::find_by_id(&self.pool, user_id).await?.is_none() {
                return Err(ResponseError::ProfileNotFound);
            }
        }

        let quality_score = reward::quality_score(submission.duration_sec, questions.len() as i64);
        let already_rewarded = match respondent {
            Some(user_id) => LedgerEntry::has_completion_reward(&self.pool, user_id, form_id).await?,
            None => false,
        };
        let decision = reward::decide(RewardInput {
            authenticated: respondent.is_some(),
            is_form_owner: respondent == Some(form.owner_id),
            already_rewarded,
            quality_score,
        });

        let data = CreateFormResponse {
            id: Uuid::new_v4(),
            form_id,
            respondent_id: respondent,
            answers: submission.answers.clone(),
            duration_sec: submission.duration_sec,
            quality_score,
            submitted_at: now,
        };

        let (response, balance) = match self.persist(&data, decision).await {
            // A concurrent submission by the same respondent claimed the reward first
            Err(ResponseError::Ledger(LedgerError::Database(e))) if is_unique_violation(&e) => {
                self.persist(&data, RewardDecision::AlreadyRewarded).await?
            }
            other => other?,
        };

        match decision {
            RewardDecision::Pay(credits) if response.rewarded_credits == credits => info!(
                response_id = %response.id,
                form_id = %form_id,
                quality_score,
                credits,
                "Completion reward credited"
            ),
            _ => debug!(
                response_id = %response.id,
                form_id = %form_id,
                quality_score,
                decision = ?decision,
                "Response stored without reward"
            ),
        }

        Ok(SubmitOutcome {
            quality_score,
            rewarded_credits: response.rewarded_credits,
            response,
            balance,
        })
    }

    async fn persist(
        &self,
        data: &CreateFormResponse,
        decision: RewardDecision,
    ) -> Result<(FormResponse, Option<i64>), ResponseError> {
        let mut tx = self.pool.begin().await?;
        let mut response = FormResponse::create(&mut tx, data).await?;

        let balance = match (decision, data.respondent_id) {
            (RewardDecision::Pay(credits), Some(user_id)) => {
                let (_, balance) = LedgerService::post_in(
                    &mut tx,
                    &NewLedgerEntry::completion_reward(user_id, credits, data.form_id, response.id),
                )
                .await?;
                FormResponse::set_rewarded_credits(&mut tx, response.id, credits).await?;
                response.rewarded_credits = credits;
                Some(balance)
            }
            (_, Some(user_id)) => Profile::balance(&mut *tx, user_id).await?,
            (_, None) => None,
        };

        tx.commit().await?;
        Ok((response, balance))
    }
}

fn check_required_answers(questions: &[Question], answers: &Value) -> Result<(), ResponseError> {
    let answers = answers.as_object().ok_or(ResponseError::AnswersNotObject)?;
    for question in questions.iter().filter(|q| q.required) {
        match answers.get(&question.id.to_string()) {
            None | Some(Value::Null) => return Err(ResponseError::MissingAnswer(question.id)),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(ResponseError::MissingAnswer(question.id));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}
