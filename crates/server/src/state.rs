use std::sync::Arc;

use db::DBService;
use services::services::{
    boost::BoostService,
    config::Config,
    form_generation::{FormGenerationService, FormSchemaGenerator},
    forms::FormService,
    ledger::LedgerService,
    llm_client::{LlmClient, LlmError},
    promotion::PromotionService,
    rate_limit::RateLimiter,
    responses::ResponseService,
};
use tracing::warn;

/// Everything a handler needs, cheap to clone into each request
#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub config: Arc<Config>,
    pub ledger: LedgerService,
    pub boosts: BoostService,
    pub promotions: PromotionService,
    pub forms: FormService,
    pub responses: ResponseService,
    pub generation: FormGenerationService,
}

impl AppState {
    /// Wire services from config. Form generation uses the Anthropic client
    /// when an API key is configured and is disabled otherwise.
    pub fn new(db: DBService, config: Config) -> Result<Self, LlmError> {
        let generator: Option<Arc<dyn FormSchemaGenerator>> = match &config.anthropic_api_key {
            Some(key) => Some(Arc::new(LlmClient::new(
                key.clone(),
                config.anthropic_model.clone(),
            )?)),
            None => {
                warn!("ANTHROPIC_API_KEY not set, form generation disabled");
                None
            }
        };
        Ok(Self::with_generator(db, config, generator))
    }

    pub fn with_generator(
        db: DBService,
        config: Config,
        generator: Option<Arc<dyn FormSchemaGenerator>>,
    ) -> Self {
        let pool = db.pool.clone();
        let rate_limiter = RateLimiter::new(
            pool.clone(),
            config.generation_rate_limit,
            config.generation_rate_window,
        );
        Self {
            ledger: LedgerService::new(pool.clone(), config.welcome_bonus_credits),
            boosts: BoostService::new(pool.clone(), config.idempotency_window),
            promotions: PromotionService::new(pool.clone()),
            forms: FormService::new(pool.clone()),
            responses: ResponseService::new(pool.clone()),
            generation: FormGenerationService::new(
                pool,
                generator,
                rate_limiter,
                config.generation_timeout,
            ),
            config: Arc::new(config),
            db,
        }
    }
}
