//! Stack graph construction.
//!
//! `build_graph` is a pure function of the config and the resolved
//! identity. `evaluate` awaits the identity lookup first and then builds.

use tracing::{info, warn};

use crate::config::StackConfig;
use crate::endpoint::{duration_string, predict_service_url};
use crate::error::GraphResult;
use crate::graph::{GraphBuilder, StackGraph};
use crate::identity::{Identity, IdentityResolver};
use crate::image::ImageRef;
use crate::types::{Output, Resource, ResourceKind, Value};

/// Name of the exported service URL output.
pub const URL_OUTPUT: &str = "url";

/// Resolve the secret accessor identity, then build the graph.
pub async fn evaluate(
    config: &StackConfig,
    resolver: &dyn IdentityResolver,
) -> GraphResult<StackGraph> {
    config.validate()?;
    let identity = resolver.resolve(&config.provider).await?;
    build_graph(config, &identity)
}

/// Declare every resource of the stack with its ordering edges.
pub fn build_graph(config: &StackConfig, identity: &Identity) -> GraphResult<StackGraph> {
    let names = &config.names;
    let project = config.provider.project.as_str();
    let region = config.provider.region.as_str();
    let secret_id = config.stack.secret.name.as_str();
    let explicit = config.ordering.explicit_access_grant;

    let mut graph = GraphBuilder::new(&config.stack.name);

    // Platform APIs.
    let capabilities = config.required_capabilities();
    if capabilities.is_empty() {
        warn!(stack = %config.stack.name, "no required services listed");
    }
    let mut enablements = Vec::with_capacity(capabilities.len());
    for capability in capabilities {
        let name = enablement_name(&names.enablement_prefix, capability);
        graph.declare(
            Resource::new(&name, ResourceKind::CapabilityEnablement)
                .property("project", project)
                .property("service", capability)
                .property("disableOnDestroy", false),
        )?;
        enablements.push(name);
    }

    // Image.
    let image = ImageRef::for_stack(config);
    graph.declare(
        Resource::new(&names.image, ResourceKind::ContainerImage)
            .property("imageName", image.to_string())
            .property(
                "build",
                Value::map([
                    ("context", Value::str(&config.image.context)),
                    (
                        "env",
                        Value::map([(
                            "DOCKER_DEFAULT_PLATFORM",
                            Value::str(&config.image.platform),
                        )]),
                    ),
                ]),
            ),
    )?;

    // Secret container and its single version.
    graph.declare(
        Resource::new(&names.secret, ResourceKind::SecretContainer)
            .property("project", project)
            .property("secretId", secret_id)
            .property("replication", Value::map([("automatic", Value::Bool(true))]))
            .depends_on(&enablements),
    )?;
    graph.declare(
        Resource::new(&names.secret_version, ResourceKind::SecretVersion)
            .property("secret", Value::reference(&names.secret, "name"))
            .property("secretData", Value::Secret(config.secret_value()?))
            .depends_on(&enablements)
            .depends_on([&names.secret]),
    )?;

    // Secret access for the resolved identity.
    let mut grant = Resource::new(&names.secret_member, ResourceKind::SecretAccessGrant)
        .property("role", config.roles.secret_accessor.as_str())
        .property("member", identity.member());
    if explicit {
        grant = grant
            .property("secretId", Value::reference(&names.secret, "secretId"))
            .depends_on(&enablements)
            .depends_on([&names.secret, &names.secret_version]);
    } else {
        grant = grant.property("secretId", secret_id);
    }
    graph.declare(grant)?;

    // Service.
    let svc = &config.service;
    let mut scaling = vec![("minInstanceCount", Value::Int(i64::from(svc.min_instances)))];
    if let Some(max) = svc.max_instances {
        scaling.push(("maxInstanceCount", Value::Int(i64::from(max))));
    }
    let container = Value::map([
        ("image", Value::reference(&names.image, "imageName")),
        (
            "resources",
            Value::map([(
                "limits",
                Value::map([
                    ("memory", Value::str(&svc.memory)),
                    ("cpu", Value::str(&svc.cpu)),
                ]),
            )]),
        ),
        (
            "ports",
            Value::List(vec![Value::map([(
                "containerPort",
                Value::Int(i64::from(svc.port)),
            )])]),
        ),
        (
            "envs",
            Value::List(vec![Value::map([
                ("name", Value::str(&svc.secret_env)),
                ("value", Value::str(config.secret_file_path())),
            ])]),
        ),
        (
            "volumeMounts",
            Value::List(vec![Value::map([
                ("name", Value::str(&svc.volume_name)),
                ("mountPath", Value::str(&svc.mount_path)),
            ])]),
        ),
    ]);
    let volume = Value::map([
        ("name", Value::str(&svc.volume_name)),
        (
            "secret",
            Value::map([
                ("secret", Value::reference(&names.secret, "name")),
                (
                    "items",
                    Value::List(vec![Value::map([
                        ("path", Value::str(secret_id)),
                        ("version", Value::str(&svc.secret_version)),
                        ("mode", Value::Int(0)),
                    ])]),
                ),
            ]),
        ),
    ]);
    let mut service = Resource::new(&names.service, ResourceKind::ManagedService)
        .property("project", project)
        .property("location", region)
        .property("name", svc.name.as_str())
        .property(
            "template",
            Value::map([
                ("containers", Value::List(vec![container])),
                ("timeout", Value::str(duration_string(svc.timeout))),
                ("scaling", Value::map(scaling)),
                ("volumes", Value::List(vec![volume])),
            ]),
        )
        .depends_on(&enablements)
        .depends_on([&names.image, &names.secret, &names.secret_version]);
    if explicit {
        service = service.depends_on([&names.secret_member]);
    }
    graph.declare(service)?;

    // Invocation grant.
    if config.access.public {
        graph.declare(
            Resource::new(&names.invoker, ResourceKind::InvocationGrant)
                .property("name", Value::reference(&names.service, "name"))
                .property("location", region)
                .property("role", config.roles.invoker.as_str())
                .property("member", config.access.invoker_member.as_str())
                .depends_on([&names.service]),
        )?;
    }

    graph.export(Output {
        name: URL_OUTPUT.to_string(),
        value: Value::reference(&names.service, "uri"),
        predicted: config
            .provider
            .project_number
            .as_deref()
            .map(|number| predict_service_url(&svc.name, number, region)),
    });

    let graph = graph.finish()?;
    info!(
        stack = %graph.stack(),
        resources = graph.len(),
        explicit_access_grant = explicit,
        "stack graph built"
    );
    Ok(graph)
}

/// Resource name for a capability enablement, e.g. `enable-run-googleapis-com`.
///
/// `.` becomes `-`; a literal `-` is written `_-` and `_` is written `__`,
/// so distinct capability ids never share a name.
pub fn enablement_name(prefix: &str, capability: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + capability.len() + 1);
    name.push_str(prefix);
    name.push('-');
    for c in capability.chars() {
        match c {
            '.' => name.push('-'),
            '-' => name.push_str("_-"),
            '_' => name.push_str("__"),
            c => name.push(c),
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GapReason;

    const STACK: &str = r#"
[stack]
name = "svc1"
required_services = ["run.googleapis.com", "secretmanager.googleapis.com"]

[stack.secret]
name = "api-key"
value = "xyz"

[provider]
project = "proj1"
region = "us-central1"
"#;

    fn identity() -> Identity {
        Identity::new("sa@proj1.iam.gserviceaccount.com").unwrap()
    }

    fn build(extra: &str) -> StackGraph {
        let config = StackConfig::parse(&format!("{STACK}\n{extra}")).unwrap();
        build_graph(&config, &identity()).unwrap()
    }

    #[test]
    fn test_explicit_grant_has_no_gaps() {
        let graph = build("");
        assert!(graph.ordering_gaps().is_empty(), "{:?}", graph.ordering_gaps());
        assert!(graph.is_ordered_before("secret-version", "secret-member"));
        assert!(graph.is_ordered_before("secret-member", "service"));
    }

    #[test]
    fn test_legacy_grant_ordering_is_reported() {
        let graph = build("[ordering]\nexplicit_access_grant = false\n");
        assert!(graph.dependencies_of("secret-member").is_empty());
        let gaps = graph.ordering_gaps();
        let lifecycle: Vec<(&str, &str)> = gaps
            .iter()
            .filter(|g| matches!(g.reason, GapReason::Lifecycle { .. }))
            .map(|g| (g.prerequisite.as_str(), g.resource.as_str()))
            .collect();
        assert_eq!(
            lifecycle,
            vec![("secret-version", "secret-member"), ("secret-member", "service")]
        );
    }

    #[test]
    fn test_enablement_names_follow_capability_ids() {
        let graph = build("");
        let names: Vec<&str> = graph
            .resources_of_kind(ResourceKind::CapabilityEnablement)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["enable-run-googleapis-com", "enable-secretmanager-googleapis-com"]
        );
    }

    #[test]
    fn test_enablement_names_never_collide() {
        assert_eq!(
            enablement_name("enable", "foo-bar.googleapis.com"),
            "enable-foo_-bar-googleapis-com"
        );
        assert_eq!(
            enablement_name("enable", "foo.bar-googleapis.com"),
            "enable-foo-bar_-googleapis-com"
        );
        assert_ne!(enablement_name("enable", "a-_b"), enablement_name("enable", "a_-b"));
        assert_ne!(enablement_name("enable", "a.-b"), enablement_name("enable", "a-.b"));

        assert!(build("").get("enable-run-googleapis-com").is_some());
    }

    #[test]
    fn test_lookalike_capabilities_both_declared() {
        let config = StackConfig::parse(&STACK.replace(
            r#"required_services = ["run.googleapis.com", "secretmanager.googleapis.com"]"#,
            r#"required_services = ["foo-bar.googleapis.com", "foo.bar-googleapis.com"]"#,
        ))
        .unwrap();
        let graph = build_graph(&config, &identity()).unwrap();
        assert_eq!(
            graph
                .resources_of_kind(ResourceKind::CapabilityEnablement)
                .count(),
            2
        );
        assert!(graph.is_ordered_before("enable-foo_-bar-googleapis-com", "service"));
        assert!(graph.is_ordered_before("enable-foo-bar_-googleapis-com", "service"));
    }

    #[test]
    fn test_private_service_has_no_invoker() {
        let graph = build("[access]\npublic = false\n");
        assert!(graph.get("invoker").is_none());
        assert!(graph.output(URL_OUTPUT).is_some());
    }

    #[test]
    fn test_custom_names_and_roles() {
        let graph = build(
            "[names]\nservice = \"web\"\ninvoker = \"web-invoker\"\n\n[roles]\ninvoker = \"roles/run.developer\"\n",
        );
        let invoker = graph.get("web-invoker").unwrap();
        assert_eq!(invoker.get("role"), Some(&Value::str("roles/run.developer")));
        assert!(graph.is_ordered_before("web", "web-invoker"));
    }

    #[test]
    fn test_name_collision_is_rejected() {
        let config = StackConfig::parse(&format!("{STACK}\n[names]\ninvoker = \"service\"\n")).unwrap();
        let err = build_graph(&config, &identity()).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_predicted_url_needs_project_number() {
        let graph = build("");
        assert!(graph.output(URL_OUTPUT).unwrap().predicted.is_none());
    }
}
