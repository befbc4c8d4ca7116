//! End-to-end graph construction for a single-service stack.

use regex::Regex;
use runstack_core::*;

fn config(required: &str, extra: &str) -> StackConfig {
    StackConfig::parse(&format!(
        r#"
[stack]
name = "svc1"
required_services = {required}

[stack.secret]
name = "api-key"
value = "xyz"

[provider]
project = "proj1"
region = "us-central1"
project_number = "123456789012"
{extra}
"#
    ))
    .unwrap()
}

async fn evaluate_default(config: &StackConfig) -> StackGraph {
    let resolver = resolver_for(config);
    evaluate(config, resolver.as_ref()).await.unwrap()
}

#[tokio::test]
async fn svc1_scenario() {
    let config = config(r#"["run.googleapis.com"]"#, "");
    let graph = evaluate_default(&config).await;

    assert_eq!(
        graph
            .resources_of_kind(ResourceKind::CapabilityEnablement)
            .count(),
        1
    );

    let image = graph.get("image").unwrap();
    assert_eq!(image.get("imageName"), Some(&Value::str("gcr.io/proj1/svc1")));
    assert_eq!(
        image.get("build/env/DOCKER_DEFAULT_PLATFORM"),
        Some(&Value::str("linux/amd64"))
    );
    assert_eq!(image.get("build/context"), Some(&Value::str("./app")));

    let secret = graph.get("secret").unwrap();
    assert_eq!(secret.get("secretId"), Some(&Value::str("api-key")));
    assert_eq!(secret.get("replication/automatic"), Some(&Value::Bool(true)));

    let versions: Vec<&Resource> = graph.resources_of_kind(ResourceKind::SecretVersion).collect();
    assert_eq!(versions.len(), 1);
    match versions[0].get("secretData") {
        Some(Value::Secret(value)) => assert_eq!(value.expose(), "xyz"),
        other => panic!("expected secret data, got {other:?}"),
    }

    let service = graph.get("service").unwrap();
    assert_eq!(service.get("name"), Some(&Value::str("test")));
    assert_eq!(service.get("location"), Some(&Value::str("us-central1")));
    assert_eq!(
        service.get("template/containers/0/envs/0/value"),
        Some(&Value::str("/secret/api-key"))
    );
    assert_eq!(
        service.get("template/containers/0/envs/0/name"),
        Some(&Value::str("SECRET_PATH"))
    );
    assert_eq!(
        service.get("template/volumes/0/secret/items/0/version"),
        Some(&Value::str("latest"))
    );
    assert_eq!(service.get("template/timeout"), Some(&Value::str("5s")));
    assert_eq!(
        service.get("template/containers/0/ports/0/containerPort"),
        Some(&Value::Int(1323))
    );

    let grants: Vec<&Resource> = graph.resources_of_kind(ResourceKind::InvocationGrant).collect();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].get("member"), Some(&Value::str("allUsers")));

    let access = graph.get("secret-member").unwrap();
    assert_eq!(
        access.get("member"),
        Some(&Value::str(
            "serviceAccount:123456789012-compute@developer.gserviceaccount.com"
        ))
    );

    let url = graph.output(URL_OUTPUT).unwrap();
    assert_eq!(url.value, Value::reference("service", "uri"));
    let predicted = url.predicted.as_deref().unwrap();
    let format = Regex::new(r"^https://test-123456789012\.us-central1\.run\.app$").unwrap();
    assert!(format.is_match(predicted), "{predicted}");
}

#[tokio::test]
async fn secret_content_never_reaches_the_environment() {
    let config = config(r#"["run.googleapis.com"]"#, "");
    let graph = evaluate_default(&config).await;
    let service = graph.get("service").unwrap();
    let json = service.properties_json().to_string();
    assert!(!json.contains("xyz"));
}

#[tokio::test]
async fn invocation_grant_follows_service() {
    let config = config(r#"["run.googleapis.com"]"#, "");
    let graph = evaluate_default(&config).await;

    assert!(graph.is_ordered_before("service", "invoker"));
    let order: Vec<&str> = graph.apply_order().iter().map(|r| r.name.as_str()).collect();
    let service = order.iter().position(|n| *n == "service").unwrap();
    let invoker = order.iter().position(|n| *n == "invoker").unwrap();
    assert!(service < invoker);
    assert_eq!(order.last(), Some(&"invoker"));
}

#[tokio::test]
async fn enablements_precede_api_consumers() {
    let config = config(r#"["run.googleapis.com", "secretmanager.googleapis.com"]"#, "");
    let graph = evaluate_default(&config).await;
    for enablement in graph.resources_of_kind(ResourceKind::CapabilityEnablement) {
        for consumer in ["secret", "secret-version", "secret-member", "service"] {
            assert!(
                graph.is_ordered_before(&enablement.name, consumer),
                "{} not before {consumer}",
                enablement.name
            );
        }
    }
    let first_wave: Vec<&str> = graph.waves()[0].iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        first_wave,
        vec![
            "enable-run-googleapis-com",
            "enable-secretmanager-googleapis-com",
            "image"
        ]
    );
}

#[tokio::test]
async fn three_capabilities_three_enablements() {
    let config = config(r#"["a", "b", "c"]"#, "");
    let graph = evaluate_default(&config).await;
    let names: Vec<&str> = graph
        .resources_of_kind(ResourceKind::CapabilityEnablement)
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names, vec!["enable-a", "enable-b", "enable-c"]);
}

#[tokio::test]
async fn duplicate_capabilities_are_collapsed() {
    let config = config(
        r#"["a.googleapis.com", "b.googleapis.com", "a.googleapis.com", "c.googleapis.com"]"#,
        "",
    );
    let graph = evaluate_default(&config).await;
    let services: Vec<&Value> = graph
        .resources_of_kind(ResourceKind::CapabilityEnablement)
        .filter_map(|r| r.get("service"))
        .collect();
    assert_eq!(
        services,
        vec![
            &Value::str("a.googleapis.com"),
            &Value::str("b.googleapis.com"),
            &Value::str("c.googleapis.com")
        ]
    );
}

#[tokio::test]
async fn identity_failure_fails_evaluation() {
    let mut config = config(r#"["run.googleapis.com"]"#, "");
    config.provider.project_number = None;
    let resolver = resolver_for(&config);
    let err = evaluate(&config, resolver.as_ref()).await.unwrap_err();
    assert!(matches!(err, GraphError::Identity(_)));
}

#[tokio::test]
async fn configured_identity_wins() {
    let config = config(
        r#"["run.googleapis.com"]"#,
        "[identity]\nservice_account = \"runner@proj1.iam.gserviceaccount.com\"\n",
    );
    let graph = evaluate_default(&config).await;
    assert_eq!(
        graph.get("secret-member").unwrap().get("member"),
        Some(&Value::str("serviceAccount:runner@proj1.iam.gserviceaccount.com"))
    );
}

#[test]
fn engine_document_carries_secret_payload() {
    let config = config(r#"["run.googleapis.com"]"#, "");
    let identity = Identity::new("sa@proj1.iam.gserviceaccount.com").unwrap();
    let graph = build_graph(&config, &identity).unwrap();

    let json = serde_json::to_value(graph.engine_document()).unwrap();
    let version = json["resources"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "secret-version")
        .unwrap();
    let data = &version["properties"]["secretData"];
    assert_eq!(data["secret"], true);
    assert_eq!(data["value"], "xyz");
    assert_eq!(data["fingerprint"], SecretValue::new("xyz").fingerprint());
}

#[test]
fn graph_document_serializes_without_secret() {
    let config = config(r#"["run.googleapis.com"]"#, "");
    let identity = Identity::new("sa@proj1.iam.gserviceaccount.com").unwrap();
    let graph = build_graph(&config, &identity).unwrap();
    let json = serde_json::to_string(&graph.document()).unwrap();
    assert!(json.contains("gcp:cloudrunv2/service:Service"));
    assert!(json.contains("${service.uri}"));
    assert!(!json.contains("\"xyz\""));
}
