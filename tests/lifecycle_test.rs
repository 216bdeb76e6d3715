mod common;

use common::{key, FakeAdmin, FakeExecutor, HarnessBuilder};
use instance_fleet::{
    Error, InstanceIdentity, InstanceKey, RunningUnit, ScriptedOperator, StateStore,
};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_activate_twice_reuses_identity() {
    let h = HarnessBuilder::new().build();
    let alpha = key("web", "alpha");

    let first = h.controller.activate(&alpha, None).await.unwrap();
    let second = h.controller.activate(&alpha, None).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.identity, second.identity);
    assert_eq!(h.store.get(&alpha).unwrap(), Some(first.identity));

    // Database objects are only created once
    let creates = h
        .admin
        .calls()
        .iter()
        .filter(|c| c.starts_with("create_database"))
        .count();
    assert_eq!(creates, 1);

    // The unit is (re)started both times with the same configuration
    let starts: Vec<_> = h
        .executor
        .started
        .lock()
        .iter()
        .map(|(_, c)| c.clone())
        .collect();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0], starts[1]);
}

#[tokio::test]
async fn test_reprovision_ignores_new_preferred_port() {
    let h = HarnessBuilder::new().build();
    let alpha = key("web", "alpha");

    let first = h.controller.provision_or_reuse(&alpha, None).await.unwrap();
    let second = h
        .controller
        .provision_or_reuse(&alpha, Some(9000))
        .await
        .unwrap();
    assert_eq!(first.identity.service_port, 5678);
    assert_eq!(second.identity.service_port, 5678);
}

#[tokio::test]
async fn test_provision_order_of_admin_commands() {
    let h = HarnessBuilder::new().build();
    h.controller
        .provision_or_reuse(&key("web", "alpha"), None)
        .await
        .unwrap();

    assert_eq!(
        h.admin.calls(),
        vec![
            "create_database web_alpha",
            "create_role web_alpha",
            "grant_all web_alpha web_alpha",
        ]
    );
}

#[tokio::test]
async fn test_activate_without_infra_is_precondition_error() {
    let h = HarnessBuilder::new().without_infra().build();
    let err = h
        .controller
        .activate(&key("web", "alpha"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Precondition(_)));
    assert!(h.admin.calls().is_empty());
    assert!(h.executor.calls().is_empty());
    assert!(h.store.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_port_scenario_with_prior_instance() {
    let h = HarnessBuilder::new().build();

    let prior = h
        .controller
        .provision_or_reuse(&key("web", "prior"), None)
        .await
        .unwrap();
    assert_eq!(prior.identity.service_port, 5678);

    let alpha = h
        .controller
        .provision_or_reuse(&key("web", "alpha"), None)
        .await
        .unwrap();
    assert_eq!(alpha.identity.service_port, 5679);

    let beta = h
        .controller
        .provision_or_reuse(&key("web", "beta"), None)
        .await
        .unwrap();
    assert_eq!(beta.identity.service_port, 5680);
}

#[tokio::test]
async fn test_ports_occupied_on_host_are_skipped() {
    let h = HarnessBuilder::new().busy_ports(&[5678, 5679]).build();

    let alpha = h
        .controller
        .provision_or_reuse(&key("web", "alpha"), None)
        .await
        .unwrap();
    assert_eq!(alpha.identity.service_port, 5680);

    let beta = h
        .controller
        .provision_or_reuse(&key("web", "beta"), None)
        .await
        .unwrap();
    assert_eq!(beta.identity.service_port, 5681);
}

#[tokio::test]
async fn test_namespace_index_is_monotonic() {
    let h = HarnessBuilder::new().build();

    let mut indices = Vec::new();
    for name in ["a", "b", "c"] {
        let p = h
            .controller
            .provision_or_reuse(&key("web", name), None)
            .await
            .unwrap();
        indices.push(p.identity.cache_namespace_index);
    }
    assert_eq!(indices, vec![3, 4, 5]);

    // Removing one in the middle does not free its index for reuse
    h.controller.deactivate(&key("web", "b")).await.unwrap();
    let d = h
        .controller
        .provision_or_reuse(&key("web", "d"), None)
        .await
        .unwrap();
    assert_eq!(d.identity.cache_namespace_index, 6);
}

#[tokio::test]
async fn test_unit_receives_identity_as_config() {
    let h = HarnessBuilder::new().build();
    let alpha = key("web", "alpha");
    let provisioned = h.controller.activate(&alpha, None).await.unwrap();
    let identity = &provisioned.identity;

    let config = h.executor.last_config("fleet-web-alpha").unwrap();
    assert_eq!(config.get("FLEET_PORT"), Some("5678"));
    assert_eq!(config.get("INSTANCE_SERVER"), Some("web"));
    assert_eq!(config.get("INSTANCE_NAME"), Some("alpha"));
    assert_eq!(config.get("DB_POSTGRESDB_DATABASE"), Some("web_alpha"));
    assert_eq!(config.get("DB_POSTGRESDB_USER"), Some("web_alpha"));
    assert_eq!(
        config.get("DB_POSTGRESDB_PASSWORD"),
        Some(identity.database_password.as_str())
    );
    assert_eq!(config.get("QUEUE_BULL_REDIS_DB"), Some("3"));
    assert_eq!(
        config.get("ENCRYPTION_KEY"),
        Some(identity.encryption_key.as_str())
    );
}

#[tokio::test]
async fn test_admin_failure_is_not_rolled_back() {
    let h = HarnessBuilder::new()
        .admin(FakeAdmin::failing_on("create_role"))
        .build();
    let alpha = key("web", "alpha");

    let err = h.controller.activate(&alpha, None).await.unwrap_err();
    match err {
        Error::AdministrativeCommand { step, .. } => assert_eq!(step, "create_role"),
        other => panic!("expected administrative error, got {:?}", other),
    }

    // The database stays behind; nothing was dropped, started or recorded
    assert_eq!(
        h.admin.calls(),
        vec!["create_database web_alpha", "create_role web_alpha"]
    );
    assert!(h.executor.calls().is_empty());
    assert_eq!(h.store.get(&alpha).unwrap(), None);
}

#[tokio::test]
async fn test_health_timeout_leaves_unit_running() {
    let h = HarnessBuilder::new()
        .executor(FakeExecutor::new().never_healthy("worker"))
        .build();
    let alpha = key("web", "alpha");

    let err = h.controller.activate(&alpha, None).await.unwrap_err();
    match &err {
        Error::HealthTimeout {
            service,
            unit,
            attempts,
            logs,
        } => {
            assert_eq!(service, "worker");
            assert_eq!(unit, "fleet-web-alpha");
            assert_eq!(*attempts, 30);
            assert!(logs.contains("worker crashed on boot"));
        }
        other => panic!("expected health timeout, got {:?}", other),
    }

    // primary and ingress pass on their first probe, worker uses the full budget
    assert_eq!(h.executor.probe_count("fleet-web-alpha", "primary"), 1);
    assert_eq!(h.executor.probe_count("fleet-web-alpha", "ingress"), 1);
    assert_eq!(h.executor.probe_count("fleet-web-alpha", "worker"), 30);
    assert_eq!(h.sleeper.count(), 29);

    // Identity persists regardless of runtime status, and nothing was stopped
    assert!(h.store.get(&alpha).unwrap().is_some());
    assert!(!h.executor.calls().iter().any(|c| c.starts_with("stop")));
    assert!(h
        .executor
        .calls()
        .contains(&"logs fleet-web-alpha worker".to_string()));
}

#[tokio::test]
async fn test_services_are_gated_in_order() {
    let h = HarnessBuilder::new()
        .executor(FakeExecutor::new().healthy_after("primary", 4))
        .build();

    h.controller
        .activate(&key("web", "alpha"), None)
        .await
        .unwrap();

    assert_eq!(h.executor.probe_count("fleet-web-alpha", "primary"), 4);
    assert_eq!(h.executor.probe_count("fleet-web-alpha", "worker"), 1);
    assert_eq!(
        *h.sleeper.sleeps.lock(),
        vec![Duration::from_secs(5); 3]
    );
}

#[tokio::test]
async fn test_deactivate_removes_everything() {
    let h = HarnessBuilder::new().build();
    let alpha = key("web", "alpha");
    h.controller.activate(&alpha, None).await.unwrap();
    assert!(h.executor.volumes().contains("fleet-web-alpha_data"));

    assert!(h.controller.deactivate(&alpha).await.unwrap());

    assert_eq!(h.store.get(&alpha).unwrap(), None);
    assert!(matches!(
        h.controller.show(&alpha),
        Err(Error::NotProvisioned(_))
    ));
    assert!(h
        .executor
        .calls()
        .contains(&"stop fleet-web-alpha true".to_string()));
    assert!(h.executor.volumes().is_empty());

    let calls = h.admin.calls();
    assert!(calls.contains(&"drop_database web_alpha".to_string()));
    assert!(calls.contains(&"drop_role web_alpha".to_string()));
}

#[tokio::test]
async fn test_deactivate_unknown_is_noop() {
    let h = HarnessBuilder::new().build();
    assert!(!h.controller.deactivate(&key("web", "ghost")).await.unwrap());
    assert!(h.executor.calls().is_empty());
    assert!(h.admin.calls().is_empty());
}

#[tokio::test]
async fn test_deactivate_after_failed_provision_is_safe() {
    let h = HarnessBuilder::new()
        .admin(FakeAdmin::failing_on("grant_all"))
        .build();
    let alpha = key("web", "alpha");
    assert!(h.controller.activate(&alpha, None).await.is_err());

    // No record, so teardown is a no-op; re-provisioning after the fault is cleared works
    assert!(!h.controller.deactivate(&alpha).await.unwrap());
    *h.admin.fail_on.lock() = None;
    let provisioned = h.controller.activate(&alpha, None).await.unwrap();
    assert!(provisioned.created);
}

#[tokio::test]
async fn test_update_requires_record() {
    let h = HarnessBuilder::new().build();
    let err = h.controller.update(&key("web", "alpha")).await.unwrap_err();
    assert!(matches!(err, Error::NotProvisioned(_)));
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_update_pulls_then_recreates() {
    let h = HarnessBuilder::new().build();
    let alpha = key("web", "alpha");
    let provisioned = h.controller.activate(&alpha, None).await.unwrap();
    h.executor.calls.lock().clear();

    let identity = h.controller.update(&alpha).await.unwrap();

    assert_eq!(identity, provisioned.identity);
    assert_eq!(
        h.executor.calls(),
        vec![
            "pull fleet-web-alpha primary,ingress,worker",
            "start fleet-web-alpha",
        ]
    );
}

#[tokio::test]
async fn test_infra_up_generates_credential_when_empty() {
    let h = HarnessBuilder::new().without_infra().build();

    let report = h.controller.infra_up().await.unwrap();
    assert!(report.created);

    let infra = h.store.get_infra().unwrap().unwrap();
    assert_eq!(infra.admin_password.len(), 32);
    assert!(infra.admin_password.chars().all(|c| c.is_ascii_alphanumeric()));

    let config = h.executor.last_config("fleet-infra").unwrap();
    assert_eq!(
        config.get("POSTGRES_PASSWORD"),
        Some(infra.admin_password.as_str())
    );
    assert_eq!(h.executor.probe_count("fleet-infra", "postgres"), 1);
    assert_eq!(h.executor.probe_count("fleet-infra", "redis"), 1);
}

#[tokio::test]
async fn test_infra_up_keeps_existing_credential() {
    let h = HarnessBuilder::new()
        .without_infra()
        .operator(ScriptedOperator::new().with_secret("chosen-by-operator"))
        .build();

    assert!(h.controller.infra_up().await.unwrap().created);
    assert!(!h.controller.infra_up().await.unwrap().created);

    // Asked exactly once, and the answer was kept
    assert_eq!(h.operator.asked().len(), 1);
    assert_eq!(
        h.store.get_infra().unwrap().unwrap().admin_password,
        "chosen-by-operator"
    );
}

#[tokio::test]
async fn test_infra_down_refuses_with_instances() {
    let h = HarnessBuilder::new()
        .operator(ScriptedOperator::new().with_confirmations(&[true]))
        .build();
    h.controller
        .provision_or_reuse(&key("web", "alpha"), None)
        .await
        .unwrap();

    let err = h.controller.infra_down(false).await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
    assert!(h.operator.asked().is_empty());
    assert!(h.store.get_infra().unwrap().is_some());

    assert!(h.controller.infra_down(true).await.unwrap());
    assert!(h.store.get_infra().unwrap().is_none());
    assert!(h
        .executor
        .calls()
        .contains(&"stop fleet-infra true".to_string()));
}

#[tokio::test]
async fn test_infra_down_declined_changes_nothing() {
    let h = HarnessBuilder::new()
        .operator(ScriptedOperator::new().with_confirmations(&[false]))
        .build();

    let err = h.controller.infra_down(false).await.unwrap_err();
    assert!(matches!(err, Error::Aborted));
    assert!(h.store.get_infra().unwrap().is_some());
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_infra_down_without_record_is_noop() {
    let h = HarnessBuilder::new().without_infra().build();
    assert!(!h.controller.infra_down(false).await.unwrap());
    assert!(h.operator.asked().is_empty());
}

#[tokio::test]
async fn test_deactivate_without_infra_skips_drops() {
    let h = HarnessBuilder::new().build();
    let alpha = key("web", "alpha");
    h.controller.activate(&alpha, None).await.unwrap();
    h.store.delete_infra().unwrap();

    assert!(h.controller.deactivate(&alpha).await.unwrap());
    assert!(!h.admin.calls().iter().any(|c| c.starts_with("drop")));
    assert_eq!(h.store.get(&alpha).unwrap(), None);
}

#[tokio::test]
async fn test_list_running_excludes_infra() {
    let h = HarnessBuilder::new().build();
    {
        let mut running = h.executor.running.lock();
        for name in ["fleet-infra", "fleet-web-alpha", "other-app"] {
            running.push(RunningUnit {
                name: name.to_string(),
                state: "running".to_string(),
                ports: vec![],
            });
        }
    }

    let names: HashSet<_> = h
        .controller
        .list_running()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect();
    assert_eq!(names, HashSet::from(["fleet-web-alpha".to_string()]));
}

#[tokio::test]
async fn test_infra_status() {
    let h = HarnessBuilder::new().build();
    let status = h.controller.infra_status().await.unwrap();
    assert!(status.provisioned);
    assert!(!status.running);

    h.executor.running.lock().push(RunningUnit {
        name: "fleet-infra".to_string(),
        state: "running".to_string(),
        ports: vec![5432],
    });
    assert!(h.controller.infra_status().await.unwrap().running);
}

#[tokio::test]
async fn test_similar_keys_never_share_database_or_unit() {
    // Separator characters are rejected inside names
    assert!(InstanceKey::new("my-web", "alpha").is_err());
    assert!(InstanceKey::new("my", "web-alpha").is_err());

    let h = HarnessBuilder::new().build();
    let a = key("myweb", "alpha");
    let b = key("my", "webalpha");

    let pa = h.controller.activate(&a, None).await.unwrap();
    let pb = h.controller.activate(&b, None).await.unwrap();
    assert_ne!(pa.identity.database_name, pb.identity.database_name);
    assert_ne!(h.controller.unit_id(&a), h.controller.unit_id(&b));

    h.controller.deactivate(&b).await.unwrap();

    // Tearing down one leaves the other's record, database and storage alone
    assert_eq!(h.store.get(&a).unwrap(), Some(pa.identity));
    assert!(!h
        .admin
        .calls()
        .contains(&"drop_database myweb_alpha".to_string()));
    assert!(h.executor.volumes().contains("fleet-myweb-alpha_data"));
    assert!(!h.executor.volumes().contains("fleet-my-webalpha_data"));
}

#[tokio::test]
async fn test_provision_refuses_database_owned_by_another_record() {
    let h = HarnessBuilder::new().build();
    // A hand-edited record that claims the database web/beta would derive
    let edited = InstanceIdentity {
        database_name: "web_beta".to_string(),
        database_user: "web_beta".to_string(),
        database_password: "Pw0123456789abcdefghijklmnopqrst".to_string(),
        cache_namespace_index: 3,
        service_port: 5678,
        encryption_key: "Ek0123456789abcdefghijklmnopqrst".to_string(),
        created_at: chrono::Utc::now(),
    };
    h.store.put(&key("web", "alpha"), &edited).unwrap();

    let err = h
        .controller
        .provision_or_reuse(&key("web", "beta"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Precondition(ref msg) if msg.contains("web_beta")));
    assert!(h.admin.calls().is_empty());
    assert_eq!(h.store.get(&key("web", "beta")).unwrap(), None);
}
