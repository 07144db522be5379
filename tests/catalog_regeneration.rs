mod support;

use std::sync::Arc;

use menu_commerce::commerce::{
    CategoryProfile, CommerceStore, MemoryCommerceStore, PlanCatalogGenerator, PlanTier,
    SystemIdentity,
};
use menu_commerce::CommerceError;
use support::{category, monthly_plan, FaultyStore};

#[tokio::test]
async fn generates_three_increasing_plans_per_category() {
    let categories = vec![category("Restaurants", 2), category("Boutique Retail", 1)];
    let store = Arc::new(MemoryCommerceStore::with_categories(categories.clone()));
    let generator = PlanCatalogGenerator::new(store.clone(), "INR");

    let summary = generator.generate(&categories, "ops").await.unwrap();
    assert_eq!(summary.total_created, 6);
    assert_eq!(summary.retired, 0);
    // Ordered by the category `order` field.
    assert_eq!(summary.per_category[0].category_name, "Boutique Retail");
    assert_eq!(summary.per_category[0].profile, CategoryProfile::Retail);
    assert!(summary.per_category.iter().all(|count| count.plans == 3));

    let food = store.active_plans(Some(categories[0].id)).await.unwrap();
    assert_eq!(food.len(), 3);
    assert_eq!(
        food.iter().map(|plan| plan.price).collect::<Vec<_>>(),
        vec![499, 1297, 2994]
    );
    assert!(food.windows(2).all(|pair| pair[0].price < pair[1].price));
    assert!(food.iter().all(|plan| !plan.is_custom && plan.created_by == "ops"));
    assert_eq!(
        food.iter().filter(|plan| plan.is_default).map(|plan| plan.tier).collect::<Vec<_>>(),
        vec![PlanTier::Starter]
    );
}

#[tokio::test]
async fn regeneration_supersedes_and_keeps_custom_plans() {
    let restaurants = category("Restaurants", 1);
    let store = Arc::new(MemoryCommerceStore::with_categories(vec![restaurants.clone()]));
    let mut custom = monthly_plan(15_000);
    custom.category_id = restaurants.id;
    custom.is_custom = true;
    custom.is_default = false;
    store.insert_plan(custom.clone()).await;

    let generator = PlanCatalogGenerator::new(store.clone(), "INR");
    let identity = SystemIdentity::new("system");
    let first = generator
        .regenerate(store.as_ref(), &identity, None)
        .await
        .unwrap();
    assert_eq!(first.total_created, 3);
    let original = store.active_plans(Some(restaurants.id)).await.unwrap();

    let second = generator
        .regenerate(store.as_ref(), &identity, Some("admin-7"))
        .await
        .unwrap();
    assert_eq!(second.retired, 3);

    let all = store.plans().await;
    for old in original.iter().filter(|plan| !plan.is_custom) {
        let old = all.iter().find(|plan| plan.id == old.id).unwrap();
        assert!(!old.active);
        let successor = all
            .iter()
            .find(|plan| Some(plan.id) == old.superseded_by)
            .unwrap();
        assert!(successor.active);
        assert_eq!(successor.tier, old.tier);
        assert_eq!(successor.version, old.version + 1);
        assert_eq!(successor.created_by, "admin-7");
    }

    let kept = all.iter().find(|plan| plan.id == custom.id).unwrap();
    assert!(kept.active);
    assert_eq!(kept.superseded_by, None);
    let active_catalog = all
        .iter()
        .filter(|plan| plan.is_catalog_managed() && plan.category_id == restaurants.id)
        .count();
    assert_eq!(active_catalog, 3);
}

#[tokio::test]
async fn no_active_categories_mutates_nothing() {
    let mut inactive = category("Restaurants", 1);
    inactive.is_active = false;
    let store = Arc::new(MemoryCommerceStore::with_categories(vec![inactive.clone()]));
    let generator = PlanCatalogGenerator::new(store.clone(), "INR");

    let err = generator.generate(&[inactive], "ops").await.unwrap_err();
    assert!(matches!(err, CommerceError::NoCategories));

    let err = generator
        .regenerate(store.as_ref(), &SystemIdentity::new("system"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::NoCategories));
    assert!(store.plans().await.is_empty());
}

#[tokio::test]
async fn mid_batch_failure_keeps_prior_catalog() {
    let categories = vec![category("Restaurants", 1), category("Salon & Spa", 2)];
    let inner = Arc::new(MemoryCommerceStore::with_categories(categories.clone()));
    let store = Arc::new(FaultyStore::new(inner.clone()));
    let generator = PlanCatalogGenerator::new(store.clone(), "INR");
    generator.generate(&categories, "ops").await.unwrap();
    let before = inner.plans().await;

    // The batch is cut after the first salon plan reaches the store.
    store.cut_next_catalog_batch(4);
    let err = generator.generate(&categories, "ops").await.unwrap_err();
    assert!(matches!(
        err,
        CommerceError::CatalogIncomplete { category_id, found: 1 } if category_id == categories[1].id
    ));
    assert_eq!(inner.plans().await, before);

    generator.generate(&categories, "ops").await.unwrap();
    assert_eq!(inner.active_plans(None).await.unwrap().len(), 6);
}

#[tokio::test]
async fn concurrent_regeneration_is_rejected() {
    let categories = vec![category("Restaurants", 1)];
    let inner = Arc::new(MemoryCommerceStore::with_categories(categories.clone()));
    let store = Arc::new(FaultyStore::new(inner));
    let generator = PlanCatalogGenerator::new(store.clone(), "INR");

    let parked = store.park_catalog_swaps().await;
    let first = tokio::spawn({
        let generator = generator.clone();
        let categories = categories.clone();
        async move { generator.generate(&categories, "ops").await }
    });
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let err = generator.generate(&categories, "ops").await.unwrap_err();
    assert!(matches!(err, CommerceError::CatalogBusy));

    drop(parked);
    let summary = first.await.unwrap().unwrap();
    assert_eq!(summary.total_created, 3);
}
