use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CommerceError, CommerceResult};

use super::identity::IdentityResolver;
use super::models::{BillingCycle, BusinessCategory, FeatureLimits, Limit, Plan, PlanTier};
use super::store::{CategoryDirectory, CommerceStore};

/// key: commerce-category-profile -> pricing/terminology family for a category
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CategoryProfile {
    Food,
    Retail,
    Creative,
    Services,
    Wellness,
    Default,
}

/// Evaluated top to bottom; the first rule with a matching keyword wins.
const CLASSIFICATION_RULES: &[(&[&str], CategoryProfile)] = &[
    (&["food", "mall", "restaurant"], CategoryProfile::Food),
    (&["retail", "e-commerce", "commerce"], CategoryProfile::Retail),
    (&["creative", "design", "portfolio"], CategoryProfile::Creative),
    (&["service", "professional"], CategoryProfile::Services),
    (&["health", "medical", "wellness"], CategoryProfile::Wellness),
];

pub fn classify(category_name: &str) -> CategoryProfile {
    let name = category_name.to_lowercase();
    CLASSIFICATION_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| name.contains(keyword)))
        .map(|(_, profile)| *profile)
        .unwrap_or(CategoryProfile::Default)
}

#[derive(Debug)]
pub struct ProfileSpec {
    pub item_type_label: &'static str,
    pub scan_type_label: &'static str,
    pub catalog_term: &'static str,
    pub catalog_term_plural: &'static str,
    pub base_price: f64,
    pub base_original_price: f64,
    pub category_multiplier: f64,
    /// (items, scans) ceilings for Starter and Professional.
    pub limits: [(u32, u32); 2],
    pub highlights: [&'static str; 2],
}

const FOOD: ProfileSpec = ProfileSpec {
    item_type_label: "Menu Items",
    scan_type_label: "QR Menu Scans",
    catalog_term: "menu",
    catalog_term_plural: "menus",
    base_price: 499.0,
    base_original_price: 999.0,
    category_multiplier: 1.0,
    limits: [(50, 1_000), (200, 5_000)],
    highlights: ["Table-wise QR codes", "Multi-outlet management"],
};

const RETAIL: ProfileSpec = ProfileSpec {
    item_type_label: "Products",
    scan_type_label: "Catalog Views",
    catalog_term: "catalog",
    catalog_term_plural: "catalogs",
    base_price: 599.0,
    base_original_price: 1199.0,
    category_multiplier: 1.2,
    limits: [(100, 2_000), (500, 10_000)],
    highlights: ["Product variants & pricing", "Inventory sync"],
};

const CREATIVE: ProfileSpec = ProfileSpec {
    item_type_label: "Portfolio Items",
    scan_type_label: "Portfolio Views",
    catalog_term: "portfolio",
    catalog_term_plural: "portfolios",
    base_price: 399.0,
    base_original_price: 799.0,
    category_multiplier: 0.9,
    limits: [(25, 1_000), (100, 5_000)],
    highlights: ["Project galleries", "Client proofing"],
};

const SERVICES: ProfileSpec = ProfileSpec {
    item_type_label: "Services",
    scan_type_label: "Profile Views",
    catalog_term: "service list",
    catalog_term_plural: "service lists",
    base_price: 449.0,
    base_original_price: 899.0,
    category_multiplier: 1.1,
    limits: [(20, 1_000), (100, 5_000)],
    highlights: ["Appointment booking links", "Team member profiles"],
};

const WELLNESS: ProfileSpec = ProfileSpec {
    item_type_label: "Treatments",
    scan_type_label: "Visitor Scans",
    catalog_term: "service menu",
    catalog_term_plural: "service menus",
    base_price: 549.0,
    base_original_price: 1099.0,
    category_multiplier: 1.15,
    limits: [(30, 1_000), (150, 5_000)],
    highlights: ["Practitioner profiles", "Appointment booking links"],
};

const DEFAULT: ProfileSpec = ProfileSpec {
    item_type_label: "Items",
    scan_type_label: "QR Scans",
    catalog_term: "catalog",
    catalog_term_plural: "catalogs",
    base_price: 499.0,
    base_original_price: 999.0,
    category_multiplier: 1.0,
    limits: [(50, 1_000), (250, 5_000)],
    highlights: ["Custom sections", "Multi-location management"],
};

impl CategoryProfile {
    pub fn spec(&self) -> &'static ProfileSpec {
        match self {
            CategoryProfile::Food => &FOOD,
            CategoryProfile::Retail => &RETAIL,
            CategoryProfile::Creative => &CREATIVE,
            CategoryProfile::Services => &SERVICES,
            CategoryProfile::Wellness => &WELLNESS,
            CategoryProfile::Default => &DEFAULT,
        }
    }
}

// Price and original-price factors differ at Professional (2.6 vs 2.5).
fn tier_factors(tier: PlanTier) -> (f64, f64) {
    match tier {
        PlanTier::Starter => (1.0, 1.0),
        PlanTier::Professional => (2.6, 2.5),
        PlanTier::Enterprise => (6.0, 6.0),
    }
}

pub fn tier_price(spec: &ProfileSpec, tier: PlanTier) -> i64 {
    let (price_factor, _) = tier_factors(tier);
    (spec.base_price * price_factor * spec.category_multiplier).round() as i64
}

pub fn tier_original_price(spec: &ProfileSpec, tier: PlanTier) -> i64 {
    let (_, original_factor) = tier_factors(tier);
    (spec.base_original_price * original_factor * spec.category_multiplier).round() as i64
}

pub fn feature_limits(spec: &ProfileSpec, tier: PlanTier) -> FeatureLimits {
    let ceiling = |index: usize| {
        let (items, scans) = spec.limits[index];
        FeatureLimits {
            items: Limit::Count(items),
            scans: Limit::Count(scans),
        }
    };
    match tier {
        PlanTier::Starter => ceiling(0),
        PlanTier::Professional => ceiling(1),
        PlanTier::Enterprise => FeatureLimits {
            items: Limit::Unlimited,
            scans: Limit::Unlimited,
        },
    }
}

fn group_digits(value: u32) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

fn limit_lines(spec: &ProfileSpec, limits: &FeatureLimits) -> [String; 2] {
    let items = match limits.items {
        Limit::Count(n) => format!("Up to {} {}", group_digits(n), spec.item_type_label),
        Limit::Unlimited => format!("Unlimited {}", spec.item_type_label),
    };
    let scans = match limits.scans {
        Limit::Count(n) => format!("{} {} per month", group_digits(n), spec.scan_type_label),
        Limit::Unlimited => format!("Unlimited {}", spec.scan_type_label),
    };
    [items, scans]
}

/// Ordered, human-readable feature bullets. Order is part of the contract.
pub fn features_list(spec: &ProfileSpec, tier: PlanTier) -> Vec<String> {
    let limits = feature_limits(spec, tier);
    let mut features: Vec<String> = limit_lines(spec, &limits).into();
    match tier {
        PlanTier::Starter => {
            features.push(format!("1 {}", spec.catalog_term));
            features.push("Standard QR code".to_string());
            features.push("Basic themes".to_string());
            features.push("Email support".to_string());
        }
        PlanTier::Professional => {
            features.push(format!("Up to 5 {}", spec.catalog_term_plural));
            features.push("Custom branding & colors".to_string());
            features.push(spec.highlights[0].to_string());
            features.push("Analytics dashboard".to_string());
            features.push("Priority email support".to_string());
        }
        PlanTier::Enterprise => {
            features.push(format!("Unlimited {}", spec.catalog_term_plural));
            features.push("White-label branding".to_string());
            features.push(spec.highlights[0].to_string());
            features.push(spec.highlights[1].to_string());
            features.push("Advanced analytics & exports".to_string());
            features.push("Dedicated account manager".to_string());
        }
    }
    features
}

/// Builds the three tier plans for one category. Versioning and supersession
/// are assigned by the store when the catalog is swapped in.
pub fn synthesize(
    category: &BusinessCategory,
    actor_id: &str,
    currency: &str,
    now: DateTime<Utc>,
) -> Vec<Plan> {
    let spec = classify(&category.name).spec();
    PlanTier::ALL
        .iter()
        .map(|tier| Plan {
            id: Uuid::new_v4(),
            category_id: category.id,
            name: format!("{} {}", category.name, tier.label()),
            tier: *tier,
            price: tier_price(spec, *tier),
            original_price: tier_original_price(spec, *tier),
            currency: currency.to_string(),
            billing_cycle: BillingCycle::Monthly,
            is_default: *tier == PlanTier::Starter,
            feature_limits: feature_limits(spec, *tier),
            features_list: features_list(spec, *tier),
            is_custom: false,
            active: true,
            version: 1,
            superseded_by: None,
            created_by: actor_id.to_string(),
            updated_by: actor_id.to_string(),
            created_at: now,
            updated_at: now,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryPlanCount {
    pub category_id: Uuid,
    pub category_name: String,
    pub profile: CategoryProfile,
    pub plans: usize,
}

/// key: commerce-catalog-summary -> batch regeneration report
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogSummary {
    pub total_created: usize,
    pub retired: usize,
    pub per_category: Vec<CategoryPlanCount>,
}

/// key: commerce-catalog-generator -> whole-catalog regeneration
#[derive(Clone)]
pub struct PlanCatalogGenerator {
    store: Arc<dyn CommerceStore>,
    currency: String,
    in_flight: Arc<Mutex<()>>,
}

impl PlanCatalogGenerator {
    pub fn new(store: Arc<dyn CommerceStore>, currency: impl Into<String>) -> Self {
        Self {
            store,
            currency: currency.into(),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub async fn generate(
        &self,
        categories: &[BusinessCategory],
        actor_id: &str,
    ) -> CommerceResult<CatalogSummary> {
        let mut active: Vec<&BusinessCategory> =
            categories.iter().filter(|category| category.is_active).collect();
        if active.is_empty() {
            return Err(CommerceError::NoCategories);
        }
        active.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));

        let _guard = self.in_flight.try_lock().map_err(|_| {
            warn!("rejected concurrent catalog regeneration");
            CommerceError::CatalogBusy
        })?;

        let now = Utc::now();
        let plans: Vec<Plan> = active
            .iter()
            .flat_map(|category| synthesize(category, actor_id, &self.currency, now))
            .collect();
        let category_ids: Vec<Uuid> = active.iter().map(|category| category.id).collect();

        let swap = self.store.replace_catalog(&category_ids, plans).await?;

        let mut created: HashMap<Uuid, usize> = HashMap::new();
        for plan in &swap.inserted {
            *created.entry(plan.category_id).or_default() += 1;
        }
        let per_category = active
            .iter()
            .map(|category| CategoryPlanCount {
                category_id: category.id,
                category_name: category.name.clone(),
                profile: classify(&category.name),
                plans: created.get(&category.id).copied().unwrap_or(0),
            })
            .collect::<Vec<_>>();

        info!(
            actor = %actor_id,
            categories = per_category.len(),
            created = swap.inserted.len(),
            retired = swap.retired,
            "plan catalog regenerated"
        );

        Ok(CatalogSummary {
            total_created: swap.inserted.len(),
            retired: swap.retired,
            per_category,
        })
    }

    /// Batch entrypoint: reads the directory, resolves the actor, regenerates.
    pub async fn regenerate(
        &self,
        directory: &dyn CategoryDirectory,
        identity: &dyn IdentityResolver,
        actor_id: Option<&str>,
    ) -> CommerceResult<CatalogSummary> {
        let categories = directory.list_active().await?;
        let actor = identity.resolve(actor_id);
        self.generate(&categories, &actor).await
    }
}
