use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Subscription tier. Variants are declared in ascending order, so the
/// derived `Ord` gives FREE < STARTER < PRO < BUSINESS.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "plan_tier", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Business,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }
}

/// Usage limits attached to a plan. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub docs_per_month: Option<u32>,
    pub ai_enabled: bool,
    pub watermark: bool,
    pub doc_types: u32,
    pub share_links: bool,
    pub team_seats: Option<u32>,
    pub api_access: bool,
    pub custom_branding: bool,
    pub priority_support: bool,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Business => "business",
        }
    }

    /// Human readable name used in emails ("Starter").
    pub fn display_name(&self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::Starter => "Starter",
            Plan::Pro => "Pro",
            Plan::Business => "Business",
        }
    }

    pub fn is_paid(&self) -> bool {
        *self > Plan::Free
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                docs_per_month: Some(3),
                ai_enabled: false,
                watermark: true,
                doc_types: 3,
                share_links: false,
                team_seats: Some(1),
                api_access: false,
                custom_branding: false,
                priority_support: false,
            },
            Plan::Starter => PlanLimits {
                docs_per_month: Some(20),
                ai_enabled: true,
                watermark: false,
                doc_types: 8,
                share_links: true,
                team_seats: Some(1),
                api_access: false,
                custom_branding: true,
                priority_support: false,
            },
            Plan::Pro => PlanLimits {
                docs_per_month: None,
                ai_enabled: true,
                watermark: false,
                doc_types: 8,
                share_links: true,
                team_seats: Some(3),
                api_access: false,
                custom_branding: true,
                priority_support: false,
            },
            Plan::Business => PlanLimits {
                docs_per_month: None,
                ai_enabled: true,
                watermark: false,
                doc_types: 8,
                share_links: true,
                team_seats: None,
                api_access: true,
                custom_branding: true,
                priority_support: true,
            },
        }
    }

    pub fn is_within_limit(&self, used_this_month: u32) -> bool {
        match self.limits().docs_per_month {
            Some(limit) => used_this_month < limit,
            None => true,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlan(pub String);

impl fmt::Display for UnknownPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown plan: {}", self.0)
    }
}

impl std::error::Error for UnknownPlan {}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            "business" => Ok(Plan::Business),
            _ => Err(UnknownPlan(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanPrices {
    pub monthly: String,
    pub yearly: String,
}

impl PlanPrices {
    fn get(&self, interval: BillingInterval) -> &str {
        match interval {
            BillingInterval::Monthly => &self.monthly,
            BillingInterval::Yearly => &self.yearly,
        }
    }

    fn contains(&self, price_id: &str) -> bool {
        !price_id.is_empty() && (self.monthly == price_id || self.yearly == price_id)
    }
}

/// Stripe price ids for every paid plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceTable {
    pub starter: PlanPrices,
    pub pro: PlanPrices,
    pub business: PlanPrices,
}

impl PriceTable {
    fn prices(&self, plan: Plan) -> Option<&PlanPrices> {
        match plan {
            Plan::Free => None,
            Plan::Starter => Some(&self.starter),
            Plan::Pro => Some(&self.pro),
            Plan::Business => Some(&self.business),
        }
    }

    /// Price id to use at checkout. `None` for FREE or an unconfigured price.
    pub fn price_id(&self, plan: Plan, interval: BillingInterval) -> Option<&str> {
        self.prices(plan)
            .map(|prices| prices.get(interval))
            .filter(|id| !id.is_empty())
    }

    /// Reverse lookup of a price id. Unknown ids resolve to `Plan::Free`.
    pub fn plan_for_price(&self, price_id: &str) -> Plan {
        [Plan::Starter, Plan::Pro, Plan::Business]
            .into_iter()
            .find(|plan| {
                self.prices(*plan)
                    .is_some_and(|prices| prices.contains(price_id))
            })
            .unwrap_or(Plan::Free)
    }
}
