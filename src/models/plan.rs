//! Subscription tiers, their usage limits, and the public plan catalog.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Subscription tier stored on `users.subscription_tier` and `subscriptions.tier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    FreeTrial,
    Starter,
    Professional,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::FreeTrial => "free_trial",
            SubscriptionTier::Starter => "starter",
            SubscriptionTier::Professional => "professional",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    /// Usage limits for this tier. `None` means unlimited.
    pub fn limits(&self) -> TierLimits {
        match self {
            SubscriptionTier::FreeTrial => TierLimits {
                emails: Some(1_000),
                api_calls: Some(100),
            },
            SubscriptionTier::Starter => TierLimits {
                emails: Some(10_000),
                api_calls: Some(1_000),
            },
            SubscriptionTier::Professional => TierLimits {
                emails: Some(100_000),
                api_calls: Some(10_000),
            },
            SubscriptionTier::Enterprise => TierLimits {
                emails: None,
                api_calls: None,
            },
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, SubscriptionTier::FreeTrial)
    }

    /// Executive summaries are reserved for the two upper tiers.
    pub fn has_executive_summary(&self) -> bool {
        matches!(
            self,
            SubscriptionTier::Professional | SubscriptionTier::Enterprise
        )
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free_trial" => Ok(SubscriptionTier::FreeTrial),
            "starter" => Ok(SubscriptionTier::Starter),
            "professional" => Ok(SubscriptionTier::Professional),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            other => Err(format!("unknown subscription tier '{other}'")),
        }
    }
}

/// Per-tier quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierLimits {
    /// Lifetime emails processed
    pub emails: Option<i64>,
    /// AI/API calls per calendar month
    pub api_calls: Option<i64>,
}

impl TierLimits {
    /// True when `used + incoming` stays within `limit`.
    pub fn allows(limit: Option<i64>, used: i64, incoming: i64) -> bool {
        match limit {
            None => true,
            Some(limit) => used.saturating_add(incoming) <= limit,
        }
    }
}

/// Billing cadence of a paid plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }
}

impl FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingCycle::Monthly),
            "yearly" => Ok(BillingCycle::Yearly),
            other => Err(format!("Invalid billing cycle '{other}', expected monthly or yearly")),
        }
    }
}

/// Limits advertised in the plan catalog. `-1` means unlimited.
#[derive(Debug, Clone, Serialize)]
pub struct PlanLimits {
    pub emails_per_month: i64,
    pub ai_insights: i64,
    pub export_formats: Vec<&'static str>,
    pub api_calls: i64,
}

/// Entry in `GET /api/v1/subscriptions/plans`.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: SubscriptionTier,
    pub name: &'static str,
    pub description: &'static str,
    pub price_monthly_cents: i64,
    pub price_yearly_cents: i64,
    pub features: Vec<&'static str>,
    pub limits: PlanLimits,
}

impl Plan {
    pub fn price_cents(&self, cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => self.price_monthly_cents,
            BillingCycle::Yearly => self.price_yearly_cents,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlansResponse {
    pub plans: Vec<Plan>,
}

/// The three purchasable plans.
pub fn catalog() -> Vec<Plan> {
    vec![
        Plan {
            id: SubscriptionTier::Starter,
            name: "Starter",
            description: "Perfect for individuals getting started with email analytics",
            price_monthly_cents: 900,
            price_yearly_cents: 9_000,
            features: vec![
                "10,000 emails per month",
                "Basic analytics",
                "Email categorization",
                "Sentiment analysis",
                "Email support",
            ],
            limits: PlanLimits {
                emails_per_month: 10_000,
                ai_insights: 5,
                export_formats: vec!["CSV"],
                api_calls: 1_000,
            },
        },
        Plan {
            id: SubscriptionTier::Professional,
            name: "Professional",
            description: "For professionals who need advanced insights and automation",
            price_monthly_cents: 2_900,
            price_yearly_cents: 29_000,
            features: vec![
                "100,000 emails per month",
                "Advanced AI insights",
                "Importance scoring",
                "Smart unsubscribe recommendations",
                "Executive summaries",
                "Priority support",
            ],
            limits: PlanLimits {
                emails_per_month: 100_000,
                ai_insights: 50,
                export_formats: vec!["CSV", "JSON", "PDF"],
                api_calls: 10_000,
            },
        },
        Plan {
            id: SubscriptionTier::Enterprise,
            name: "Enterprise",
            description: "For teams and organizations requiring unlimited access",
            price_monthly_cents: 9_900,
            price_yearly_cents: 99_000,
            features: vec![
                "Unlimited emails",
                "Custom AI models",
                "Advanced analytics",
                "Team collaboration",
                "White-label options",
                "Dedicated support",
            ],
            limits: PlanLimits {
                emails_per_month: -1,
                ai_insights: -1,
                export_formats: vec!["CSV", "JSON", "PDF", "Excel"],
                api_calls: -1,
            },
        },
    ]
}

/// Look up a purchasable plan. The free trial is not in the catalog.
pub fn find_plan(tier: SubscriptionTier) -> Option<Plan> {
    catalog().into_iter().find(|plan| plan.id == tier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_round_trip_through_strings() {
        for tier in [
            SubscriptionTier::FreeTrial,
            SubscriptionTier::Starter,
            SubscriptionTier::Professional,
            SubscriptionTier::Enterprise,
        ] {
            assert_eq!(tier.as_str().parse::<SubscriptionTier>(), Ok(tier));
        }
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn enterprise_is_unlimited() {
        let limits = SubscriptionTier::Enterprise.limits();
        assert!(TierLimits::allows(limits.emails, i64::MAX - 1, 10));
        assert!(TierLimits::allows(limits.api_calls, 1_000_000, 1));
    }

    #[test]
    fn free_trial_email_limit_is_inclusive() {
        let limits = SubscriptionTier::FreeTrial.limits();
        assert!(TierLimits::allows(limits.emails, 990, 10));
        assert!(!TierLimits::allows(limits.emails, 990, 11));
    }

    #[test]
    fn catalog_excludes_free_trial() {
        let plans = catalog();
        assert_eq!(plans.len(), 3);
        assert!(find_plan(SubscriptionTier::FreeTrial).is_none());
        let pro = find_plan(SubscriptionTier::Professional).unwrap();
        assert_eq!(pro.price_cents(BillingCycle::Yearly), 29_000);
    }

    #[test]
    fn feature_gates() {
        assert!(!SubscriptionTier::FreeTrial.is_paid());
        assert!(SubscriptionTier::Starter.is_paid());
        assert!(!SubscriptionTier::Starter.has_executive_summary());
        assert!(SubscriptionTier::Enterprise.has_executive_summary());
    }
}
