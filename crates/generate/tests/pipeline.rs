use std::collections::BTreeMap;

use hawser_core::resources::Resource;
use hawser_core::{labels, Error, HealthCheck, ServiceDescriptor};
use hawser_generate::{GenerationPipeline, StreamItem};

fn svc(name: &str, image: &str) -> ServiceDescriptor {
    ServiceDescriptor { name: name.to_string(), image: image.to_string(), ..Default::default() }
}

fn manifest(services: Vec<ServiceDescriptor>) -> BTreeMap<String, ServiceDescriptor> {
    services.into_iter().map(|s| (s.name.clone(), s)).collect()
}

struct RunOutput {
    resources: BTreeMap<String, Vec<Resource>>,
    results: BTreeMap<String, Result<(), Error>>,
    pipeline: GenerationPipeline,
}

async fn run(services: BTreeMap<String, ServiceDescriptor>) -> RunOutput {
    let pipeline = GenerationPipeline::new("testapp");
    let mut resources = BTreeMap::new();
    let mut results = BTreeMap::new();
    for mut stream in pipeline.generate(&services) {
        let mut emitted = Vec::new();
        let mut saw_end = false;
        while let Some(item) = stream.rx.recv().await {
            match item {
                StreamItem::Resource(r) => {
                    assert!(!saw_end, "resource after end marker for {}", stream.service);
                    emitted.push(r);
                }
                StreamItem::End => saw_end = true,
            }
        }
        let result = stream.task.await.expect("task panicked");
        assert_eq!(result.is_ok(), saw_end, "end marker must match task outcome");
        resources.insert(stream.service.clone(), emitted);
        results.insert(stream.service, result);
    }
    RunOutput { resources, results, pipeline }
}

fn workload(resources: &[Resource]) -> &hawser_core::resources::Deployment {
    resources
        .iter()
        .find_map(|r| match r {
            Resource::Workload(d) => Some(d),
            _ => None,
        })
        .expect("no workload emitted")
}

#[tokio::test]
async fn portless_service_emits_no_network_service() {
    let out = run(manifest(vec![svc("worker", "busybox")])).await;
    let kinds: Vec<&str> = out.resources["worker"].iter().map(Resource::kind).collect();
    assert_eq!(kinds, vec!["deployment"]);
}

#[tokio::test]
async fn web_with_ingress_label_gets_service_and_disabled_ingress() {
    let mut web = svc("web", "nginx");
    web.ports = vec!["80:80".to_string()];
    web.labels.insert(labels::INGRESS.to_string(), "80".to_string());
    let out = run(manifest(vec![web])).await;

    let resources = &out.resources["web"];
    let services: Vec<_> = resources
        .iter()
        .filter_map(|r| match r {
            Resource::NetworkService(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].spec.ports[0].port, 80);

    let ingresses: Vec<_> = resources
        .iter()
        .filter_map(|r| match r {
            Resource::Ingress(i) => Some(i),
            _ => None,
        })
        .collect();
    assert_eq!(ingresses.len(), 1);
    assert_eq!(ingresses[0].spec.rules[0].host, "{{ .Values.web.ingress.host }}");
    assert_eq!(
        ingresses[0].spec.rules[0].http.paths[0].backend.service.port.number,
        80
    );

    let values = out.pipeline.values().snapshot();
    let ingress_values = values["web"].ingress.as_ref().expect("ingress values");
    assert_eq!(ingress_values.host, "web.testapp.tld");
    assert!(!ingress_values.enabled);
}

#[tokio::test]
async fn non_integer_ingress_label_is_fatal() {
    let mut web = svc("web", "nginx");
    web.ports = vec!["80:80".to_string()];
    web.labels.insert(labels::INGRESS.to_string(), "eighty".to_string());
    let out = run(manifest(vec![web])).await;
    let err = out.results["web"].as_ref().unwrap_err();
    assert!(matches!(err, Error::InvalidIngressPort { .. }), "{err}");
}

#[tokio::test]
async fn dependency_port_parameterizes_one_init_wait_container() {
    // database's port comes from a ports label merged by the compose layer,
    // so it reaches the descriptor as a plain declared port
    let mut database = svc("database", "mysql:5.7");
    database.ports = vec!["3306".to_string()];
    let mut php = svc("php", "php:7.2-apache");
    php.depends_on = vec!["database".to_string()];
    let out = run(manifest(vec![database, php])).await;

    let inits = &workload(&out.resources["php"]).spec.template.spec.init_containers;
    assert_eq!(inits.len(), 1);
    assert_eq!(inits[0].name, "check-database");
    assert_eq!(inits[0].image, "busybox");
    let script = &inits[0].command[2];
    assert!(script.contains("{{ .Release.Name }}-database 3306"), "{script}");
}

#[tokio::test]
async fn dependency_without_any_port_aborts_naming_both_services() {
    let database = svc("database", "mysql:5.7");
    let mut php = svc("php", "php:7.2-apache");
    php.depends_on = vec!["database".to_string()];
    let out = run(manifest(vec![database, php])).await;

    assert!(out.results["database"].is_ok());
    let err = out.results["php"].as_ref().unwrap_err();
    match err {
        Error::UnresolvedDependency { dependent, dependency } => {
            assert_eq!(dependent, "php");
            assert_eq!(dependency, "database");
        }
        other => panic!("unexpected error: {other}"),
    }
    let message = err.to_string();
    assert!(message.contains("php") && message.contains("database"), "{message}");
}

#[tokio::test]
async fn dependency_missing_from_manifest_aborts_too() {
    let mut php = svc("php", "php:7.2-apache");
    php.depends_on = vec!["ghost".to_string()];
    let out = run(manifest(vec![php])).await;
    let err = out.results["php"].as_ref().unwrap_err();
    assert!(matches!(err, Error::UnresolvedDependency { .. }), "{err}");
}

#[tokio::test]
async fn persistent_volume_produces_gated_claim_and_values_defaults() {
    let mut db = svc("database", "mysql:5.7");
    db.ports = vec!["3306".to_string()];
    db.volumes = vec!["data:/var/lib/mysql".to_string()];
    let out = run(manifest(vec![db])).await;

    let resources = &out.resources["database"];
    let claim = resources
        .iter()
        .find_map(|r| match r {
            Resource::StorageClaim(p) => Some(p),
            _ => None,
        })
        .expect("no storage claim");
    assert_eq!(claim.base.metadata.name, "{{ .Release.Name }}-database-data");
    assert_eq!(
        claim.spec.resources.requests.storage,
        "{{ .Values.database.persistence.data.capacity }}"
    );

    let pod = &workload(resources).spec.template.spec;
    let volume = &pod.volumes[0];
    assert_eq!(volume.name, "data");
    assert_eq!(
        volume.persistent_volume_claim.as_ref().unwrap().claim_name,
        "{{ .Release.Name }}-database-data"
    );
    assert_eq!(pod.containers[0].volume_mounts[0].mount_path, "/var/lib/mysql");

    let values = out.pipeline.values().snapshot();
    let persistence = &values["database"].persistence["data"];
    assert!(!persistence.enabled, "persistence must default to disabled");
    assert_eq!(persistence.capacity, "1Gi");
}

#[tokio::test]
async fn local_and_anonymous_volumes_are_skipped_not_fatal() {
    let mut novol = svc("novol", "nginx");
    novol.ports = vec!["80:80".to_string()];
    novol.volumes = vec!["/tmp/data".to_string(), "./local:/data".to_string()];
    let out = run(manifest(vec![novol])).await;

    assert!(out.results["novol"].is_ok());
    let pod = &workload(&out.resources["novol"]).spec.template.spec;
    assert!(pod.volumes.is_empty());
    assert!(pod.containers[0].volume_mounts.is_empty());
}

#[tokio::test]
async fn env_file_becomes_literal_configmap_wired_through_env_from() {
    let dir = std::env::temp_dir().join(format!(
        "hawser-test-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let envfile = dir.join("env");
    std::fs::write(&envfile, "KEY=value\n").unwrap();

    let mut app = svc("app", "nginx");
    app.env_files = vec![envfile.to_string_lossy().to_string()];
    let out = run(manifest(vec![app])).await;

    let resources = &out.resources["app"];
    let store = resources
        .iter()
        .find_map(|r| match r {
            Resource::ConfigStore(c) => Some(c),
            _ => None,
        })
        .expect("no config store");
    assert_eq!(store.data.get("KEY").map(String::as_str), Some("value"));

    let container = &workload(resources).spec.template.spec.containers[0];
    assert_eq!(
        container.env_from[0].config_map_ref.as_ref().unwrap().name,
        store.base.metadata.name
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn secret_env_file_defers_literals_to_values() {
    let dir = std::env::temp_dir().join(format!(
        "hawser-secret-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let envfile = dir.join("secrets.env");
    std::fs::write(&envfile, "DB_PASS=hunter2\n").unwrap();
    let envfile = envfile.to_string_lossy().to_string();

    let mut app = svc("app", "nginx");
    app.env_files = vec![envfile.clone()];
    app.labels.insert(labels::SECRET_ENVFILES.to_string(), envfile);
    let out = run(manifest(vec![app])).await;

    let secret = out.resources["app"]
        .iter()
        .find_map(|r| match r {
            Resource::SecretStore(s) => Some(s),
            _ => None,
        })
        .expect("no secret store");
    assert_eq!(
        secret.data.get("DB_PASS").map(String::as_str),
        Some("{{ .Values.app.DB_PASS | b64enc | quote }}")
    );
    let values = out.pipeline.values().snapshot();
    assert_eq!(values["app"].extra.get("DB_PASS").map(String::as_str), Some("hunter2"));

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn malformed_env_file_line_is_fatal() {
    let dir = std::env::temp_dir().join(format!(
        "hawser-badenv-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let envfile = dir.join("env");
    std::fs::write(&envfile, "JUSTAKEY\n").unwrap();

    let mut app = svc("app", "nginx");
    app.env_files = vec![envfile.to_string_lossy().to_string()];
    let out = run(manifest(vec![app])).await;
    let err = out.results["app"].as_ref().unwrap_err();
    assert!(matches!(err, Error::MalformedEnvLine { .. }), "{err}");

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn healthcheck_label_routes_to_http_probe() {
    let mut web = svc("web", "nginx");
    web.ports = vec!["80:80".to_string()];
    web.healthcheck = Some(HealthCheck {
        test: Vec::new(),
        interval: Some("30s".to_string()),
        start_period: Some("5s".to_string()),
        retries: 3,
    });
    web.labels
        .insert(labels::HEALTHCHECK.to_string(), "http://localhost:8080/healthz".to_string());
    let out = run(manifest(vec![web])).await;

    let probe = workload(&out.resources["web"]).spec.template.spec.containers[0]
        .liveness_probe
        .as_ref()
        .expect("no probe");
    assert_eq!(probe.period_seconds, 30);
    assert_eq!(probe.initial_delay_seconds, 5);
    assert_eq!(probe.failure_threshold, 3);
    let http = probe.http_get.as_ref().expect("no http probe");
    assert_eq!(http.path, "/healthz");
    assert_eq!(http.port, 8080);
}

#[tokio::test]
async fn healthcheck_test_requires_cmd_marker() {
    let mut web = svc("web", "nginx");
    web.healthcheck = Some(HealthCheck {
        test: vec!["CMD-SHELL".to_string(), "curl localhost".to_string()],
        interval: None,
        start_period: None,
        retries: 1,
    });
    let out = run(manifest(vec![web])).await;
    let err = out.results["web"].as_ref().unwrap_err();
    assert!(matches!(err, Error::InvalidHealthTest { .. }), "{err}");
}

#[tokio::test]
async fn exposed_only_ports_get_an_external_node_port_service() {
    let mut cache = svc("cache", "redis");
    cache.expose = vec![6379];
    let out = run(manifest(vec![cache])).await;

    let services: Vec<_> = out.resources["cache"]
        .iter()
        .filter_map(|r| match r {
            Resource::NetworkService(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(services.len(), 2);
    let external = services
        .iter()
        .find(|s| s.spec.service_type.as_deref() == Some("NodePort"))
        .expect("no external service");
    assert_eq!(external.base.metadata.name, "{{ .Release.Name }}-cache-external");
    assert_eq!(external.spec.ports[0].port, 6379);
}

#[tokio::test]
async fn same_pod_member_contributes_container_but_no_workload() {
    let mut site = svc("site", "nginx");
    site.ports = vec!["80:80".to_string()];
    let mut pool = svc("pool", "php-fpm");
    pool.ports = vec!["9000:9000".to_string()];
    pool.labels.insert(labels::SAME_POD.to_string(), "site".to_string());
    let out = run(manifest(vec![site, pool])).await;

    assert!(
        !out.resources["pool"].iter().any(|r| matches!(r, Resource::Workload(_))),
        "grouped service must not own a workload"
    );
    let pool_service = out.resources["pool"]
        .iter()
        .find_map(|r| match r {
            Resource::NetworkService(s) => Some(s),
            _ => None,
        })
        .expect("member keeps its network service");
    assert_eq!(
        pool_service.spec.selector.get("hawser.io/component").map(String::as_str),
        Some("site")
    );

    let anchor = workload(&out.resources["site"]);
    let names: Vec<&str> =
        anchor.spec.template.spec.containers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["site", "pool"]);
}

#[tokio::test]
async fn per_service_streams_keep_fixed_order() {
    let dir = std::env::temp_dir().join(format!(
        "hawser-order-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let envfile = dir.join("env");
    std::fs::write(&envfile, "A=1\n").unwrap();

    let mut app = svc("app", "nginx");
    app.ports = vec!["80:80".to_string()];
    app.env_files = vec![envfile.to_string_lossy().to_string()];
    app.volumes = vec!["data:/data".to_string()];
    let out = run(manifest(vec![app])).await;

    let kinds: Vec<&str> = out.resources["app"].iter().map(Resource::kind).collect();
    assert_eq!(kinds, vec!["configmap", "pvc", "service", "deployment"]);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn command_is_kept_and_service_valued_env_gets_release_prefixed() {
    let mut php = svc("php", "php:7.2-apache");
    php.command = vec!["/bin/sh".to_string(), "-c".to_string(), "php-fpm".to_string()];
    php.environment.insert("DB_HOST".to_string(), "database".to_string());
    php.environment.insert("DB_NAME".to_string(), "app".to_string());
    php.labels.insert(labels::ENV_TO_SERVICE.to_string(), "DB_HOST".to_string());
    let out = run(manifest(vec![php])).await;

    let container = &workload(&out.resources["php"]).spec.template.spec.containers[0];
    assert_eq!(container.command, vec!["/bin/sh", "-c", "php-fpm"]);
    let env: std::collections::BTreeMap<&str, &str> =
        container.env.iter().map(|e| (e.name.as_str(), e.value.as_str())).collect();
    assert_eq!(env["DB_HOST"], "{{ .Release.Name }}-database");
    assert_eq!(env["DB_NAME"], "app");
}

#[tokio::test]
async fn ports_label_discovers_through_the_compose_layer() {
    let manifest_text = "\
services:
  database:
    image: mysql:5.7
    labels:
      hawser.io/ports: 3306
  php:
    image: php:7.2-apache
    depends_on:
      - database
";
    let services = hawser_compose::parse(manifest_text).unwrap();
    let out = run(services).await;

    assert!(
        out.resources["database"].iter().any(|r| matches!(r, Resource::NetworkService(_))),
        "ports label must produce a network service"
    );
    let inits = &workload(&out.resources["php"]).spec.template.spec.init_containers;
    assert_eq!(inits.len(), 1);
    assert!(inits[0].command[2].contains("3306"), "{}", inits[0].command[2]);
}

#[tokio::test]
async fn regeneration_from_identical_input_is_byte_identical() {
    let mut database = svc("database", "mysql:5.7");
    database.ports = vec!["3306".to_string()];
    database.volumes = vec!["data:/var/lib/mysql".to_string()];
    let mut php = svc("php", "php:7.2-apache");
    php.depends_on = vec!["database".to_string()];
    php.labels.insert(labels::INGRESS.to_string(), "80".to_string());
    php.ports = vec!["80:80".to_string()];
    let services = manifest(vec![database, php]);

    let first = run(services.clone()).await;
    let second = run(services).await;

    for (service, resources) in &first.resources {
        let a: Vec<String> =
            resources.iter().map(|r| serde_yaml::to_string(r).unwrap()).collect();
        let b: Vec<String> = second.resources[service]
            .iter()
            .map(|r| serde_yaml::to_string(r).unwrap())
            .collect();
        assert_eq!(a, b, "resources differ for {service}");
    }
    assert_eq!(
        serde_yaml::to_string(&first.pipeline.values().snapshot()).unwrap(),
        serde_yaml::to_string(&second.pipeline.values().snapshot()).unwrap()
    );
}
