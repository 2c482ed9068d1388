//! Pure reward arithmetic. No I/O; the response service decides when to pay.

/// Seconds a respondent is expected to spend per question
const SECONDS_PER_QUESTION: f64 = 10.0;
/// Responses scoring below this earn nothing
pub const MIN_QUALITY: f64 = 0.3;
pub const BASE_REWARD: i64 = 10;
const QUALITY_BONUS: f64 = 10.0;

/// `min(1, duration / (questions * 10))`, and 0 for a form without questions
pub fn quality_score(duration_sec: i64, question_count: i64) -> f64 {
    if question_count <= 0 || duration_sec <= 0 {
        return 0.0;
    }
    let expected = question_count as f64 * SECONDS_PER_QUESTION;
    (duration_sec as f64 / expected).min(1.0)
}

/// Credits for an eligible response: 10 to 20
pub fn reward_for(quality_score: f64) -> i64 {
    let bonus = (quality_score.clamp(0.0, 1.0) * QUALITY_BONUS).floor() as i64;
    BASE_REWARD + bonus
}

/// Per-completion reward a form advertises, derived from its generated settings.
/// Shown to respondents only; payouts always use `reward_for`.
pub fn advertised_reward(estimated_time_minutes: i32, difficulty: i32) -> i64 {
    BASE_REWARD + i64::from(estimated_time_minutes) * 2 + i64::from(difficulty) * 5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardDecision {
    Pay(i64),
    Anonymous,
    OwnForm,
    BelowQualityBar,
    AlreadyRewarded,
}

impl RewardDecision {
    pub fn credits(self) -> i64 {
        match self {
            RewardDecision::Pay(credits) => credits,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RewardInput {
    pub authenticated: bool,
    pub is_form_owner: bool,
    pub already_rewarded: bool,
    pub quality_score: f64,
}

pub fn decide(input: RewardInput) -> RewardDecision {
    if !input.authenticated {
        RewardDecision::Anonymous
    } else if input.is_form_owner {
        RewardDecision::OwnForm
    } else if input.quality_score < MIN_QUALITY {
        RewardDecision::BelowQualityBar
    } else if input.already_rewarded {
        RewardDecision::AlreadyRewarded
    } else {
        RewardDecision::Pay(reward_for(input.quality_score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eligible(quality_score: f64) -> RewardInput {
        RewardInput {
            authenticated: true,
            is_form_owner: false,
            already_rewarded: false,
            quality_score,
        }
    }

    #[test]
    fn test_quality_score_caps_at_one() {
        assert_eq!(quality_score(60, 5), 1.0);
        assert_eq!(quality_score(25, 5), 0.5);
    }

    #[test]
    fn test_quality_score_without_questions_is_zero() {
        assert_eq!(quality_score(600, 0), 0.0);
        assert_eq!(quality_score(0, 5), 0.0);
    }

    #[test]
    fn test_reward_range() {
        assert_eq!(reward_for(0.3), 13);
        assert_eq!(reward_for(0.99), 19);
        assert_eq!(reward_for(1.0), 20);
    }

    #[test]
    fn test_quality_threshold_is_inclusive() {
        assert_eq!(decide(eligible(0.3)), RewardDecision::Pay(13));
        assert_eq!(decide(eligible(0.2999)), RewardDecision::BelowQualityBar);
    }

    #[test]
    fn test_full_quality_five_questions_in_a_minute_pays_twenty() {
        let score = quality_score(60, 5);
        assert_eq!(decide(eligible(score)), RewardDecision::Pay(20));
    }

    #[test]
    fn test_anonymous_is_never_paid() {
        let decision = decide(RewardInput {
            authenticated: false,
            ..eligible(0.9)
        });
        assert_eq!(decision, RewardDecision::Anonymous);
        assert_eq!(decision.credits(), 0);
    }

    #[test]
    fn test_own_form_and_repeat_are_not_paid() {
        assert_eq!(
            decide(RewardInput {
                is_form_owner: true,
                ..eligible(1.0)
            }),
            RewardDecision::OwnForm
        );
        assert_eq!(
            decide(RewardInput {
                already_rewarded: true,
                ..eligible(1.0)
            }),
            RewardDecision::AlreadyRewarded
        );
    }

    #[test]
    fn test_advertised_reward() {
        assert_eq!(advertised_reward(5, 3), 10 + 10 + 15);
    }
}
