pub mod boost;
pub mod config;
pub mod database_validator;
pub mod form_generation;
pub mod forms;
pub mod ledger;
pub mod llm_client;
pub mod promotion;
pub mod rate_limit;
pub mod reconciler;
pub mod responses;
pub mod reward;

#[cfg(test)]
pub(crate) mod test_support {
    use db::{
        DBService,
        models::{
            boost_product::BoostProduct,
            form::{CreateForm, Form, FormStatus},
            question::{CreateQuestion, Question, QuestionKind},
        },
    };
    use sqlx::SqlitePool;
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::ledger::LedgerService;

    /// A migrated on-disk database, for tests that need several connections
    pub async fn file_db() -> (DBService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = DBService::new(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        (db, dir)
    }

    /// A profile holding exactly `balance` credits, all from the welcome bonus
    pub async fn user_with_balance(pool: &SqlitePool, balance: i64) -> Uuid {
        let user = Uuid::new_v4();
        LedgerService::new(pool.clone(), balance)
            .bootstrap_account(user, None)
            .await
            .unwrap();
        user
    }

    pub async fn form_with_questions(
        pool: &SqlitePool,
        owner_id: Uuid,
        status: FormStatus,
        question_count: usize,
    ) -> Form {
        let mut tx = pool.begin().await.unwrap();
        let form = Form::create(
            &mut tx,
            Uuid::new_v4(),
            &CreateForm {
                owner_id,
                title: "Coffee habits".to_string(),
                description: None,
                category: Some("lifestyle".to_string()),
                estimated_time: 2,
                difficulty: 2,
                reward: 24,
                status: Some(status),
            },
        )
        .await
        .unwrap();
        for position in 0..question_count {
            Question::create(
                &mut tx,
                form.id,
                position as i32,
                &CreateQuestion {
                    kind: QuestionKind::ShortText,
                    title: format!("Question {}", position + 1),
                    required: false,
                    options: None,
                },
            )
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();
        form
    }

    pub async fn product(pool: &SqlitePool, code: &str) -> BoostProduct {
        BoostProduct::find_by_code(pool, code).await.unwrap().unwrap()
    }
}
