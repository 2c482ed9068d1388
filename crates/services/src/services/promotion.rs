//! Read side of boosts: derived status per purchase and the ranked feed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use db::models::{
    boost_product::Placement,
    boost_purchase::{BoostPurchase, BoostPurchaseWithStatus, PromotionStatus},
    form::{Form, FormStatus},
};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

pub const DEFAULT_FEED_LIMIT: usize = 20;
pub const MAX_FEED_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("form not found")]
    FormNotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct FeedItem {
    pub form_id: Uuid,
    pub title: String,
    pub category: Option<String>,
    pub estimated_time: i32,
    pub reward: i64,
    pub placement: Placement,
    pub purchase_id: Uuid,
    pub ends_at: DateTime<Utc>,
}

/// Running purchases ordered pin > for_you > needs_responses, newest purchase
/// first within a placement, keeping only the best-ranked purchase per form.
pub fn rank_running(mut purchases: Vec<BoostPurchase>, now: DateTime<Utc>) -> Vec<BoostPurchase> {
    purchases.retain(|p| p.status_at(now) == PromotionStatus::Running);
    purchases.sort_by(|a, b| {
        b.placement
            .rank()
            .cmp(&a.placement.rank())
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut seen = HashSet::new();
    purchases.retain(|p| seen.insert(p.form_id));
    purchases
}

#[derive(Clone)]
pub struct PromotionService {
    pool: SqlitePool,
}

impl PromotionService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn feed(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<FeedItem>, sqlx::Error> {
        let limit = limit.clamp(1, MAX_FEED_LIMIT);
        let ranked = rank_running(BoostPurchase::find_live(&self.pool, now).await?, now);

        let mut items = Vec::with_capacity(limit.min(ranked.len()));
        for purchase in ranked {
            if items.len() == limit {
                break;
            }
            let Some(form) = Form::find_by_id(&self.pool, purchase.form_id).await? else {
                continue;
            };
            if form.status != FormStatus::Published {
                continue;
            }
            items.push(FeedItem {
                form_id: form.id,
                title: form.title,
                category: form.category,
                estimated_time: form.estimated_time,
                reward: form.reward,
                placement: purchase.placement,
                purchase_id: purchase.id,
                ends_at: purchase.end_at,
            });
        }
        Ok(items)
    }

    pub async fn for_form(
        &self,
        form_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<BoostPurchaseWithStatus>, PromotionError> {
        if Form::find_by_id(&self.pool, form_id).await?.is_none() {
            return Err(PromotionError::FormNotFound);
        }
        Ok(BoostPurchase::find_by_form_id(&self.pool, form_id)
            .await?
            .into_iter()
            .map(|purchase| BoostPurchaseWithStatus::at(purchase, now))
            .collect())
    }
}
