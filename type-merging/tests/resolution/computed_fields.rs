use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use serde_json_bytes::Value;
use type_merging::ErrorExtension;
use type_merging::FieldMergeConfig;
use type_merging::MergeExecutor;
use type_merging::MergePlannerConfig;
use type_merging::MergeRegistry;
use type_merging::MergedTypeConfig;
use type_merging::ResolutionState;

use super::support::by_id;
use super::support::object;
use super::support::selection;
use super::support::Recorder;

/// `reviews` supplies `reviews` directly and `trust` computed from the `plan` billing supplies.
fn executor(billing: Arc<Recorder>, reviews: Arc<Recorder>) -> MergeExecutor {
    let mut builder = MergeRegistry::builder()
        .subservice("billing", billing)
        .subservice("reviews", reviews);
    builder
        .register_all(
            "User",
            [
                MergedTypeConfig::new("billing")
                    .entry_point(by_id("billingAccount"))
                    .fields(["plan"]),
                MergedTypeConfig::new("reviews")
                    .entry_point(by_id("reviewer"))
                    .fields(["reviews"])
                    .field(
                        "trust",
                        FieldMergeConfig::new()
                            .computed(selection("{ plan }"))
                            .non_null(),
                    ),
            ],
        )
        .unwrap();
    MergeExecutor::new(
        Arc::new(builder.build().unwrap()),
        MergePlannerConfig::default(),
    )
}

fn reviews() -> Arc<Recorder> {
    Recorder::new(|request| {
        if request.selection_set.contains("trust") {
            let plan = request.representations[0]
                .get("plan")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(json!({ "trust": format!("trusted ({plan})") }))
        } else {
            Ok(json!({ "reviews": ["great"] }))
        }
    })
}

#[tokio::test]
async fn computed_fields_are_resolved_in_their_own_call() {
    let billing = Recorder::new(|_| Ok(json!({ "plan": "pro" })));
    let reviews = reviews();
    let executor = executor(billing.clone(), reviews.clone());
    let requested = selection("{ reviews trust }");

    let plan = executor
        .plan("User", &requested, &object(json!({ "id": "7" })))
        .unwrap();
    insta::assert_snapshot!(plan, @r###"
    MergePlan(User) {
      Layer {
        Delegate(subservice: "reviews", field: "reviewer") #0 { reviews } <- { id },
        Delegate(subservice: "billing", field: "billingAccount") #1 { plan } <- { id },
      },
      Layer {
        Delegate(subservice: "reviews", field: "reviewer", computed, after: [#1]) #2 { trust } <- { id plan },
      },
    }
    "###);

    let (result, errors) = executor
        .resolve_merged_field("User", &requested, object(json!({ "id": "7" })))
        .await;
    assert!(errors.is_empty());
    assert_eq!(
        Value::Object(result.data),
        json!({ "id": "7", "reviews": ["great"], "plan": "pro", "trust": "trusted (pro)" })
    );

    let calls = reviews.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].selection_set, selection("{ reviews }"));
    assert_eq!(Value::Object(calls[0].representations[0].clone()), json!({ "id": "7" }));
    assert_eq!(calls[1].selection_set, selection("{ trust }"));
    assert_eq!(
        Value::Object(calls[1].representations[0].clone()),
        json!({ "id": "7", "plan": "pro" })
    );
}

#[tokio::test]
async fn computed_fields_never_see_incomplete_representations() {
    let billing = Recorder::new(|_| Ok(json!({ "plan": null })));
    let reviews = reviews();
    let executor = executor(billing, reviews.clone());

    let (result, errors) = executor
        .resolve_merged_field(
            "User",
            &selection("{ reviews trust }"),
            object(json!({ "id": "7" })),
        )
        .await;
    assert_eq!(result.state, ResolutionState::PartialFailure);
    assert_eq!(
        Value::Object(result.data),
        json!({ "id": "7", "reviews": ["great"] })
    );
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field, "trust");
    assert_eq!(errors[0].extension_code(), "MISSING_REQUIREMENTS");

    let calls = reviews.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].selection_set.contains("trust"));
}

#[tokio::test]
async fn null_requirements_on_the_original_object_are_fetched() {
    let billing = Recorder::new(|_| Ok(json!({ "plan": "pro" })));
    let reviews = reviews();
    let executor = executor(billing.clone(), reviews.clone());

    let (result, errors) = executor
        .resolve_merged_field(
            "User",
            &selection("{ trust }"),
            object(json!({ "id": "7", "plan": null })),
        )
        .await;
    assert!(errors.is_empty());
    assert_eq!(result.state, ResolutionState::Complete);
    assert_eq!(
        Value::Object(result.data),
        json!({ "id": "7", "plan": "pro", "trust": "trusted (pro)" })
    );

    assert_eq!(billing.calls().len(), 1);
    let calls = reviews.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        Value::Object(calls[0].representations[0].clone()),
        json!({ "id": "7", "plan": "pro" })
    );
}

#[tokio::test]
async fn null_results_respect_nullability() {
    let billing = Recorder::new(|_| Ok(json!({ "plan": "pro" })));
    let reviews = Recorder::new(|_| Ok(Value::Null));
    let executor = executor(billing, reviews);

    let (result, errors) = executor
        .resolve_merged_field("User", &selection("{ reviews }"), object(json!({ "id": "7" })))
        .await;
    assert!(errors.is_empty());
    assert_eq!(result.state, ResolutionState::Complete);
    assert_eq!(Value::Object(result.data), json!({ "id": "7" }));

    let (_, errors) = executor
        .resolve_merged_field("User", &selection("{ trust }"), object(json!({ "id": "7" })))
        .await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].extension_code(), "NULL_FOR_NON_NULLABLE");
}

#[tokio::test]
async fn canonical_markers_do_not_change_plans() {
    let plan_with = |canonical: &str| {
        let mut builder = MergeRegistry::builder()
            .subservice("accounts", Recorder::new(|_| Ok(Value::Null)))
            .subservice("profiles", Recorder::new(|_| Ok(Value::Null)));
        for subservice in ["accounts", "profiles"] {
            let mut bio = FieldMergeConfig::new().description(format!("bio from {subservice}"));
            let mut config = MergedTypeConfig::new(subservice).entry_point(by_id("user"));
            if subservice == canonical {
                bio = bio.canonical();
                config = config.canonical();
            }
            builder
                .register("User", config.field("bio", bio))
                .unwrap();
        }
        let registry = Arc::new(builder.build().unwrap());
        let description = registry
            .lookup("User")
            .and_then(|user| user.field_description("bio"))
            .map(str::to_string);
        let executor = MergeExecutor::new(registry, MergePlannerConfig::default());
        let plan = executor
            .plan("User", &selection("{ bio }"), &object(json!({ "id": "1" })))
            .unwrap();
        (plan.to_string(), description)
    };

    let (accounts_plan, accounts_description) = plan_with("accounts");
    let (profiles_plan, profiles_description) = plan_with("profiles");
    assert_eq!(accounts_plan, profiles_plan);
    assert_eq!(accounts_description.as_deref(), Some("bio from accounts"));
    assert_eq!(profiles_description.as_deref(), Some("bio from profiles"));
}
