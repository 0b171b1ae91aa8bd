use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use shoal_core::EntryType;
use shoal_deployer::{
    ApplicationServices, DeployError, DeployPlan, Deployer, HandlerRegistry, Provider,
    ProviderError, ProviderFactory, ServiceDefinition, ServiceHandler, handler_fn,
};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingProvider {
    info: Option<Value>,
    refuse: Option<String>,
    registered: Mutex<Vec<(String, String, Option<Value>)>>,
}

impl RecordingProvider {
    fn registered_keys(&self) -> Vec<String> {
        self.registered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, key, _)| key.clone())
            .collect()
    }
}

impl Provider for RecordingProvider {
    fn register_service<'a>(
        &'a self,
        application: &'a str,
        service: &'a ServiceDefinition,
        _handler: Arc<dyn ServiceHandler>,
        settings: Option<&'a Value>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            if self.refuse.as_deref() == Some(service.key().as_str()) {
                return Err(ProviderError("port already bound".into()));
            }
            self.registered.lock().unwrap().push((
                application.to_string(),
                service.key(),
                settings.cloned(),
            ));
            Ok(())
        })
    }

    fn info(&self) -> Option<Value> {
        self.info.clone()
    }
}

fn factory_with(providers: &[(&str, Arc<RecordingProvider>)]) -> ProviderFactory {
    providers
        .iter()
        .fold(ProviderFactory::new(), |factory, (name, provider)| {
            let provider = Arc::clone(provider);
            factory.with_provider(*name, move |_| Ok(provider.clone() as Arc<dyn Provider>))
        })
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("apps/shop")).unwrap();
        std::fs::write(dir.path().join("apps/shop/cart.js"), "// cart").unwrap();
        Self { dir }
    }

    fn plan(&self, extra: Value) -> DeployPlan {
        let mut plan = json!({
            "providers": [
                {
                    "code": { "name": "p1" },
                    "providerSettings": { "public": { "host": "10.0.0.1", "port": 8080 } },
                    "applicationSettings": [{
                        "application": "shop",
                        "commonSettings": { "timeout": 30 },
                        "serviceSettings": [{
                            "module": "cart",
                            "name": "add",
                            "settings": { "route": "/add" }
                        }]
                    }]
                },
                { "code": { "name": "p2" }, "providerSettings": {} }
            ],
            "applications": [{
                "name": "shop",
                "version": "1.0.0",
                "code": { "locationType": "file", "location": "apps/shop" }
            }]
        });
        if let (Some(app), Value::Object(extra)) =
            (plan["applications"][0].as_object_mut(), extra)
        {
            app.extend(extra);
        }
        serde_json::from_value(plan).unwrap()
    }
}

fn definitions(services: &[(&str, &str)]) -> Vec<ApplicationServices> {
    vec![ApplicationServices {
        application: "shop".into(),
        services: services
            .iter()
            .map(|(module, name)| ServiceDefinition {
                name: (*name).into(),
                module: (*module).into(),
                filepath: Some("cart.js".into()),
                return_type: Some("number".into()),
                ..Default::default()
            })
            .collect(),
    }]
}

fn handlers(names: &[&str]) -> HandlerRegistry {
    names.iter().fold(HandlerRegistry::new(), |registry, name| {
        registry.with_handler(
            "shop",
            "cart.js",
            *name,
            handler_fn(|_| async { Ok(Value::Null) }),
        )
    })
}

#[tokio::test]
async fn dedicated_and_proxy_entries_follow_provider_order() {
    let fixture = Fixture::new();
    let p1 = Arc::new(RecordingProvider::default());
    let p2 = Arc::new(RecordingProvider::default());
    let mut deployer = Deployer::new(
        factory_with(&[("p1", p1.clone()), ("p2", p2.clone())]),
        Arc::new(handlers(&["add"])),
    )
    .with_base_dir(fixture.dir.path());

    let result = deployer
        .deploy_plan(&fixture.plan(json!({})), &definitions(&[("cart", "add")]))
        .await
        .unwrap();

    let records = &result["shop"];
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.identity.version.as_deref(), Some("1.0.0"));
    assert_eq!(record.return_type.as_deref(), Some("number"));
    assert_eq!(record.entries.len(), 2);

    let dedicated = &record.entries[0];
    assert_eq!(dedicated.entry_type, EntryType::Dedicated);
    assert_eq!(dedicated.provider_name, "p1");
    assert_eq!(dedicated.provider_info.as_ref().unwrap()["host"], "10.0.0.1");
    assert_eq!(
        dedicated.settings_for_provider,
        Some(json!({ "timeout": 30, "route": "/add" }))
    );

    let proxy = &record.entries[1];
    assert_eq!(proxy.entry_type, EntryType::Proxy);
    assert!(proxy.provider_info.is_none());
    assert!(proxy.settings_for_provider.is_none());

    // The provider received the merged settings too.
    let seen = p1.registered.lock().unwrap();
    assert_eq!(seen[0].2, Some(json!({ "timeout": 30, "route": "/add" })));
    assert_eq!(p2.registered_keys(), vec!["cart/add"]);
    assert_eq!(deployer.metrics().snapshot().registrations, 2);
}

#[tokio::test]
async fn provider_info_marks_entry_dedicated() {
    let fixture = Fixture::new();
    let p2 = Arc::new(RecordingProvider {
        info: Some(json!({ "host": "10.0.0.2" })),
        ..Default::default()
    });
    let mut deployer = Deployer::new(
        factory_with(&[("p1", Arc::new(RecordingProvider::default())), ("p2", p2)]),
        Arc::new(handlers(&["add"])),
    )
    .with_base_dir(fixture.dir.path());

    let result = deployer
        .deploy_plan(&fixture.plan(json!({})), &definitions(&[("cart", "add")]))
        .await
        .unwrap();
    let entries = &result["shop"][0].entries;
    assert_eq!(entries[1].entry_type, EntryType::Dedicated);
    assert_eq!(entries[1].provider_info, Some(json!({ "host": "10.0.0.2" })));
}

#[tokio::test]
async fn refused_registration_aborts_the_run() {
    let fixture = Fixture::new();
    let p1 = Arc::new(RecordingProvider::default());
    let p2 = Arc::new(RecordingProvider {
        refuse: Some("cart/remove".into()),
        ..Default::default()
    });
    let mut deployer = Deployer::new(
        factory_with(&[("p1", p1.clone()), ("p2", p2)]),
        Arc::new(handlers(&["add", "remove"])),
    )
    .with_base_dir(fixture.dir.path());

    let err = deployer
        .deploy_plan(
            &fixture.plan(json!({})),
            &definitions(&[("cart", "add"), ("cart", "remove")]),
        )
        .await
        .unwrap_err();

    match err {
        DeployError::Registration {
            application,
            service,
            provider,
            ..
        } => {
            assert_eq!(application, "shop");
            assert_eq!(service, "cart/remove");
            assert_eq!(provider, "p2");
        }
        other => panic!("unexpected error: {other}"),
    }
    // Earlier registrations are not rolled back.
    assert_eq!(p1.registered_keys(), vec!["cart/add", "cart/remove"]);
    let snap = deployer.metrics().snapshot();
    assert_eq!(snap.runs_failed, 1);
    assert_eq!(snap.runs_completed, 0);
}

#[tokio::test]
async fn missing_source_or_handler_is_a_configuration_error() {
    let fixture = Fixture::new();
    let mut deployer = Deployer::new(
        factory_with(&[("p1", Arc::new(RecordingProvider::default()))]),
        Arc::new(handlers(&["add"])),
    )
    .with_base_dir(fixture.dir.path());

    let mut missing_file = definitions(&[("cart", "add")]);
    missing_file[0].services[0].filepath = Some("nope.js".into());
    assert!(matches!(
        deployer.deploy_plan(&fixture.plan(json!({})), &missing_file).await,
        Err(DeployError::MissingSourceFile { .. })
    ));

    let mut no_path = definitions(&[("cart", "add")]);
    no_path[0].services[0].filepath = None;
    assert!(matches!(
        deployer.deploy_plan(&fixture.plan(json!({})), &no_path).await,
        Err(DeployError::MissingFilePath { .. })
    ));

    assert!(matches!(
        deployer
            .deploy_plan(&fixture.plan(json!({})), &definitions(&[("cart", "checkout")]))
            .await,
        Err(DeployError::MissingHandler { .. })
    ));
}

#[tokio::test]
async fn service_without_providers_is_fatal() {
    let fixture = Fixture::new();
    let mut plan = fixture.plan(json!({}));
    plan.providers.clear();
    let mut deployer = Deployer::new(ProviderFactory::new(), Arc::new(handlers(&["add"])))
        .with_base_dir(fixture.dir.path());

    assert!(matches!(
        deployer.deploy_plan(&plan, &definitions(&[("cart", "add")])).await,
        Err(DeployError::NoProviderAccepted { .. })
    ));
}

#[tokio::test]
async fn init_runs_in_order_with_declared_arguments() {
    let fixture = Fixture::new();
    let calls: Arc<Mutex<Vec<(String, Vec<Value>)>>> = Arc::default();
    let recorder = |label: &'static str| {
        let calls = Arc::clone(&calls);
        handler_fn(move |args| {
            calls.lock().unwrap().push((label.to_string(), args));
            async { Ok(Value::Null) }
        })
    };
    let handlers = HandlerRegistry::new()
        .with_handler("shop", "cart.js", "add", recorder("add"))
        .with_handler("shop", "cart.js", "seed", recorder("seed"));

    let mut deployer = Deployer::new(
        factory_with(&[("p1", Arc::new(RecordingProvider::default()))]),
        Arc::new(handlers),
    )
    .with_base_dir(fixture.dir.path());

    let plan = fixture.plan(json!({
        "init": [
            { "service": "cart/seed", "arguments": [1, "a"] },
            { "service": "cart/add" }
        ]
    }));
    deployer
        .deploy_plan(&plan, &definitions(&[("cart", "add"), ("cart", "seed")]))
        .await
        .unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], ("seed".to_string(), vec![json!(1), json!("a")]));
    assert_eq!(calls[1], ("add".to_string(), vec![]));
}

#[tokio::test]
async fn init_naming_unknown_service_fails() {
    let fixture = Fixture::new();
    let mut deployer = Deployer::new(
        factory_with(&[("p1", Arc::new(RecordingProvider::default()))]),
        Arc::new(handlers(&["add"])),
    )
    .with_base_dir(fixture.dir.path());

    let plan = fixture.plan(json!({ "init": [{ "service": "cart/ghost" }] }));
    assert!(matches!(
        deployer.deploy_plan(&plan, &definitions(&[("cart", "add")])).await,
        Err(DeployError::UnknownInitService { .. })
    ));
}

#[tokio::test]
async fn absent_code_location_yields_empty_application() {
    let fixture = Fixture::new();
    let mut deployer = Deployer::new(
        factory_with(&[("p1", Arc::new(RecordingProvider::default()))]),
        Arc::new(handlers(&["add"])),
    )
    .with_base_dir(fixture.dir.path());

    let plan = fixture.plan(json!({
        "code": { "locationType": "file", "location": "apps/missing" }
    }));
    let result = deployer
        .deploy_plan(&plan, &definitions(&[("cart", "add")]))
        .await
        .unwrap();
    assert!(result["shop"].is_empty());
}

#[tokio::test]
async fn deploy_reads_plan_file_and_rejects_malformed_input() {
    let fixture = Fixture::new();
    let plan_path = fixture.dir.path().join("plan.json");
    std::fs::write(
        &plan_path,
        serde_json::to_string(&fixture.plan(json!({}))).unwrap(),
    )
    .unwrap();
    let defs = serde_json::to_value(definitions(&[("cart", "add")])).unwrap();

    let mut deployer = Deployer::new(
        factory_with(&[("p1", Arc::new(RecordingProvider::default()))]),
        Arc::new(handlers(&["add"])),
    )
    .with_base_dir(fixture.dir.path());

    let result = deployer.deploy(&plan_path, &defs).await.unwrap().unwrap();
    assert_eq!(result["shop"].len(), 1);

    assert!(
        deployer
            .deploy(&plan_path, &json!({ "shop": [] }))
            .await
            .unwrap()
            .is_none()
    );

    let no_apps = fixture.dir.path().join("no-apps.json");
    std::fs::write(&no_apps, r#"{ "providers": [] }"#).unwrap();
    assert!(deployer.deploy(&no_apps, &defs).await.unwrap().is_none());

    assert!(matches!(
        deployer
            .deploy(&fixture.dir.path().join("missing.json"), &defs)
            .await,
        Err(DeployError::PlanUnreadable { .. })
    ));
}

#[tokio::test]
async fn duplicate_provider_name_uses_the_later_definition() {
    let fixture = Fixture::new();
    let p1 = Arc::new(RecordingProvider::default());
    let mut deployer = Deployer::new(
        factory_with(&[("p1", p1.clone()), ("p2", Arc::new(RecordingProvider::default()))]),
        Arc::new(handlers(&["add"])),
    )
    .with_base_dir(fixture.dir.path());

    let mut plan = fixture.plan(json!({}));
    let mut later: Value = serde_json::to_value(&plan.providers[0]).unwrap();
    later["providerSettings"]["public"]["host"] = json!("10.0.0.9");
    later["applicationSettings"] = json!([]);
    plan.providers.push(serde_json::from_value(later).unwrap());

    let result = deployer
        .deploy_plan(&plan, &definitions(&[("cart", "add")]))
        .await
        .unwrap();

    // One entry per provider name, in first-seen order.
    let entries = &result["shop"][0].entries;
    let names: Vec<&str> = entries.iter().map(|e| e.provider_name.as_str()).collect();
    assert_eq!(names, vec!["p1", "p2"]);
    assert_eq!(entries[0].provider_info.as_ref().unwrap()["host"], "10.0.0.9");
    assert_eq!(entries[0].settings_for_provider, None);
    let raw = entries[0].provider_raw.as_ref().unwrap();
    assert_eq!(raw["providerSettings"]["public"]["host"], "10.0.0.9");
    assert_eq!(p1.registered_keys(), vec!["cart/add"]);
}
