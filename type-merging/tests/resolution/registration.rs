use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json_bytes::json;
use serde_json_bytes::Value;
use type_merging::ConfigError;
use type_merging::DelegationError;
use type_merging::ErrorExtension;
use type_merging::FieldError;
use type_merging::FieldMergeConfig;
use type_merging::MergeError;
use type_merging::MergeExecutor;
use type_merging::MergePlannerConfig;
use type_merging::MergeRegistry;
use type_merging::MergedTypeConfig;
use type_merging::PlanError;
use type_merging::ResolutionError;

use super::support::by_id;
use super::support::keys;
use super::support::object;
use super::support::selection;
use super::support::Recorder;

fn view(subservice: &str, fields: &[&str]) -> MergedTypeConfig {
    MergedTypeConfig::new(subservice)
        .entry_point(by_id(subservice))
        .fields(fields.iter().copied())
}

fn requiring(subservice: &str, field: &str, requires: &str) -> MergedTypeConfig {
    MergedTypeConfig::new(subservice)
        .entry_point(by_id(subservice))
        .field(field, FieldMergeConfig::new().requires(selection(requires)))
}

#[rstest]
#[case::independent_views(
    vec![view("accounts", &["email"]), view("posts", &["posts"])],
    vec![vec!["accounts", "posts"]]
)]
#[case::chain_of_requirements(
    vec![
        view("accounts", &["email"]),
        requiring("billing", "plan", "{ email }"),
        requiring("invoices", "total", "{ plan }"),
    ],
    vec![vec!["accounts"], vec!["billing"], vec!["invoices"]]
)]
#[case::declaration_order_within_a_layer(
    vec![
        requiring("billing", "plan", "{ email }"),
        view("posts", &["posts"]),
        view("accounts", &["email"]),
    ],
    vec![vec!["posts", "accounts"], vec!["billing"]]
)]
#[case::shared_providers_do_not_order_views(
    vec![
        view("accounts", &["email"]),
        view("profiles", &["email"]),
        requiring("billing", "plan", "{ email }"),
    ],
    vec![vec!["accounts", "profiles", "billing"]]
)]
#[case::computed_fields_do_not_order_views(
    vec![
        view("billing", &["plan"]),
        MergedTypeConfig::new("reviews")
            .entry_point(by_id("reviewer"))
            .field("trust", FieldMergeConfig::new().computed(selection("{ plan }"))),
    ],
    vec![vec!["billing", "reviews"]]
)]
fn views_are_layered_by_their_requirements(
    #[case] configs: Vec<MergedTypeConfig>,
    #[case] expected: Vec<Vec<&str>>,
) {
    let mut builder = MergeRegistry::builder();
    let mut layers = Vec::new();
    for config in configs {
        let user = builder.register("User", config).unwrap();
        layers = user
            .graph()
            .layers()
            .into_iter()
            .map(|layer| layer.into_iter().map(str::to_string).collect::<Vec<_>>())
            .collect();
    }
    assert_eq!(layers, expected);
}

#[rstest]
#[case::view_supplying_its_own_requirement(
    vec![view("a", &["y"]).field("x", FieldMergeConfig::new().requires(selection("{ y }")))],
    "'a'"
)]
#[case::every_provider_needs_the_view_registered_last(
    vec![
        requiring("b", "y", "{ x }"),
        requiring("c", "y", "{ x }"),
        requiring("a", "x", "{ y }"),
    ],
    "'b', 'c', 'a'"
)]
#[case::every_provider_needs_the_view_registered_first(
    vec![
        requiring("a", "x", "{ y }"),
        requiring("b", "y", "{ x }"),
        requiring("c", "y", "{ x }"),
    ],
    "'a', 'b'"
)]
fn cycles_are_rejected_whatever_the_registration_order(
    #[case] configs: Vec<MergedTypeConfig>,
    #[case] subservices: &str,
) {
    let mut builder = MergeRegistry::builder();
    let error = builder.register_all("Thing", configs).unwrap_err();
    assert_eq!(
        error.to_string(),
        format!("dependency cycle for type 'Thing' between subservices {subservices}")
    );
}

#[test]
fn cycles_are_rejected_when_registered() {
    let mut builder = MergeRegistry::builder();
    builder
        .register(
            "Thing",
            view("a", &["id"]).field("x", FieldMergeConfig::new().requires(selection("{ y }"))),
        )
        .unwrap();

    let error = builder
        .register("Thing", requiring("b", "y", "{ x }"))
        .unwrap_err();
    assert!(matches!(error, ConfigError::DependencyCycle { .. }));
    assert_eq!(
        error.to_string(),
        "dependency cycle for type 'Thing' between subservices 'a', 'b'"
    );

    let registry = builder
        .subservice("a", Recorder::new(|_| Ok(Value::Null)))
        .build()
        .unwrap();
    let thing = registry.lookup("Thing").unwrap();
    assert_eq!(thing.configs().len(), 1);
    assert_eq!(thing.fields(), selection("{ id x }"));
}

#[tokio::test]
async fn yaml_configuration_is_registered_and_resolved() {
    let configs: Vec<MergedTypeConfig> = serde_yaml::from_str(
        r#"
- subservice: accounts
  canonical: true
  entryPoints:
    - selectionSet: "{ id }"
      fieldName: usersByIds
      kind: batched
      args:
        fromKeyList:
          argument: ids
  fields:
    email:
      nullable: false
      description: Login email
- subservice: billing
  entryPoints:
    - selectionSet: "{ id }"
      fieldName: billingAccount
      kind: singular
      args:
        fromOriginalObject:
          arguments:
            userId:
              field: id
            account:
              representation
  fields:
    plan:
      selectionSet: "{ email }"
"#,
    )
    .unwrap();

    let accounts = Recorder::new(|request| {
        Ok(Value::Array(
            keys(request, "ids")
                .into_iter()
                .map(|id| {
                    let email = format!("{}@example.com", id.as_str().unwrap_or_default());
                    json!({ "email": email })
                })
                .collect(),
        ))
    });
    let billing = Recorder::new(|request| {
        let email = request
            .args
            .get("account")
            .and_then(|account| account.as_object())
            .and_then(|account| account.get("email"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(json!({ "plan": format!("pro for {email}") }))
    });
    let mut builder = MergeRegistry::builder()
        .subservice("accounts", accounts.clone())
        .subservice("billing", billing.clone());
    builder.register_all("User", configs).unwrap();
    let registry = Arc::new(builder.build().unwrap());

    let user = registry.lookup("User").unwrap();
    assert_eq!(user.canonical_subservice(), Some("accounts"));
    assert_eq!(user.field_description("email"), Some("Login email"));
    assert_eq!(
        user.graph().to_string(),
        "DependencyGraph(User) {\n  accounts -> billing { email }\n}"
    );

    let executor = MergeExecutor::new(registry, MergePlannerConfig::default());
    let (result, errors) = executor
        .resolve_merged_field("User", &selection("{ plan }"), object(json!({ "id": "ada" })))
        .await;
    assert!(errors.is_empty());
    assert_eq!(
        Value::Object(result.data),
        json!({ "id": "ada", "email": "ada@example.com", "plan": "pro for ada@example.com" })
    );

    let billing_calls = billing.calls();
    assert_eq!(billing_calls.len(), 1);
    assert_eq!(
        Value::Object(billing_calls[0].args.clone()),
        json!({
            "userId": "ada",
            "account": { "id": "ada", "email": "ada@example.com" },
        })
    );
    assert_eq!(accounts.calls().len(), 1);
}

#[test]
fn planner_configuration_rejects_unknown_options() {
    let config = MergePlannerConfig::from_yaml(
        "batching:\n  enabled: false\nplan_cache:\n  limit: 8\n",
    )
    .unwrap();
    assert!(!config.batching.enabled);
    assert!(config.batching.dedupe_keys);
    assert_eq!(config.plan_cache.limit.get(), 8);

    let error = MergePlannerConfig::from_yaml("batching:\n  window: 10ms\n").unwrap_err();
    assert!(matches!(error, ConfigError::Deserialize(_)));
}

#[rstest]
#[case::unknown_type(
    PlanError::UnknownType { type_name: "Product".to_string() }.into(),
    "UNKNOWN_MERGED_TYPE"
)]
#[case::unsatisfiable(
    PlanError::Unsatisfiable {
        type_name: "User".to_string(),
        field: "nickname".to_string(),
    }.into(),
    "UNSATISFIABLE_FIELD"
)]
#[case::missing_requirements(
    PlanError::MissingRequirements {
        subservice: "billing".to_string(),
        field_name: "billingAccount".to_string(),
        missing: "{ email }".to_string(),
    }.into(),
    "MISSING_REQUIREMENTS"
)]
#[case::dependency_failed(
    PlanError::DependencyFailed {
        subservice: "billing".to_string(),
        field_name: "billingAccount".to_string(),
    }.into(),
    "DEPENDENCY_FAILED"
)]
#[case::delegation(
    DelegationError {
        subservice: "accounts".to_string(),
        field_name: "userById".to_string(),
        cause: "timeout".to_string(),
    }.into(),
    "SUBSERVICE_CALL_FAILED"
)]
#[case::null_for_non_nullable(
    MergeError::NullForNonNullable { field: "email".to_string() }.into(),
    "NULL_FOR_NON_NULLABLE"
)]
#[case::batch_size_mismatch(
    MergeError::BatchSizeMismatch { expected: 3, received: 2 }.into(),
    "BATCH_SIZE_MISMATCH"
)]
#[case::malformed_batch_result(MergeError::MalformedBatchResult.into(), "MALFORMED_BATCH_RESULT")]
fn field_errors_carry_stable_codes(#[case] error: ResolutionError, #[case] code: &str) {
    let error = FieldError::new("email", error);
    assert_eq!(error.extension_code(), code);
    assert!(error.to_string().starts_with("field 'email': "));
}
