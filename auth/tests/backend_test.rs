//! End-to-end tests of the backend against an in-memory store and a mock
//! compute directory.

use auth::{
    Backend, ConnectionInfo, DirectoryFactory, LoginRequest, RoleField, RoleWriteRequest,
};
use chrono::TimeDelta;
use config::{ApiConfig, ConfigWriteRequest};
use errors::{AuthError, DirectoryError};
use exo_core::{ComputeDirectory, DirectoryResource, RequestContext, StaticSystemView, Storage};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use storage::{InmemStorage, put_json};
use testing::{Fault, InstanceBuilder, MockDirectory};

const EDGE_POLICY: &str =
    r#"client_ip == instance_public_ip && instance_created > now - duration("10m")"#;
const INSTANCE_IP: &str = "203.0.113.10";

struct CountingFactory {
    directory: Arc<MockDirectory>,
    builds: AtomicUsize,
}

impl DirectoryFactory for CountingFactory {
    fn build(&self, _config: &ApiConfig) -> Result<Arc<dyn ComputeDirectory>, DirectoryError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.directory.clone() as Arc<dyn ComputeDirectory>)
    }
}

struct Harness {
    backend: Backend,
    storage: Arc<InmemStorage>,
    directory: Arc<MockDirectory>,
    factory: Arc<CountingFactory>,
}

impl Harness {
    async fn new(directory: MockDirectory) -> Self {
        let harness = Self::unconfigured(directory);
        harness.configure(false).await;
        harness
    }

    fn unconfigured(directory: MockDirectory) -> Self {
        let storage = Arc::new(InmemStorage::new());
        let directory = Arc::new(directory);
        let factory = Arc::new(CountingFactory {
            directory: directory.clone(),
            builds: AtomicUsize::new(0),
        });
        let system = Arc::new(StaticSystemView {
            default_lease_ttl: Duration::from_secs(3600),
            max_lease_ttl: Duration::from_secs(7200),
        });
        let backend = Backend::new(storage.clone(), system, factory.clone(), 32);
        Self {
            backend,
            storage,
            directory,
            factory,
        }
    }

    async fn configure(&self, approle_mode: bool) {
        self.backend
            .write_config(ConfigWriteRequest {
                api_key: Some("EXOtest".to_string()),
                api_secret: Some("s3cr3t".to_string()),
                zone: Some("ch-gva-2".to_string()),
                approle_mode: Some(approle_mode),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    async fn role(&self, name: &str, validator: &str) -> String {
        let mut req = RoleWriteRequest::new(name).validator(validator);
        req.token_ttl = Some(600);
        req.token_max_ttl = Some(1200);
        req.token_policies = Some(vec!["edge".to_string()]);
        self.backend.create_role(req).await.unwrap().data.role_id
    }

    async fn login(&self, role: &str, instance: &str) -> Result<auth::Auth, AuthError> {
        self.backend
            .login(
                &RequestContext::new(),
                &LoginRequest::new(role, instance),
                &ConnectionInfo::from_addr(INSTANCE_IP),
            )
            .await
    }

    async fn snapshot(&self) -> Vec<(String, Option<Vec<u8>>)> {
        let mut out = Vec::new();
        for key in self.storage.keys() {
            let value = self.storage.get(&key).await.unwrap();
            out.push((key, value));
        }
        out
    }
}

fn edge_directory(age: TimeDelta) -> MockDirectory {
    MockDirectory::new()
        .with_instance(
            InstanceBuilder::new("i-edge")
                .name("edge-1")
                .public_ip(INSTANCE_IP)
                .age(age)
                .pool("pool-1")
                .security_group("sg-1")
                .build(),
        )
        .with_pool("pool-1", "edge")
        .with_security_group("sg-1", "default")
}

#[tokio::test]
async fn test_recent_instance_is_granted() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    h.role("edge", EDGE_POLICY).await;

    let auth = h.login("edge", "i-edge").await.unwrap();
    assert_eq!(auth.policies, vec!["edge"]);
    assert_eq!((auth.ttl, auth.max_ttl, auth.period), (600, 1200, 0));
    assert_eq!(auth.alias.name, "i-edge");
    assert_eq!(auth.display_name, "edge-1");
    assert_eq!(auth.metadata["role"], "edge");
    assert_eq!(auth.metadata["instance_id"], "i-edge");
    assert_eq!(auth.metadata["zone"], "ch-gva-2");
    assert_eq!(auth.renewal_state.role, "edge");
    assert_eq!(auth.renewal_state.zone, "ch-gva-2");
}

#[tokio::test]
async fn test_old_instance_is_denied() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(60))).await;
    h.role("edge", EDGE_POLICY).await;

    let err = h.login("edge", "i-edge").await.unwrap_err();
    assert!(matches!(err, AuthError::AuthFailed { .. }));
    assert_eq!(err.public_message(), "authentication failed");
}

#[tokio::test]
async fn test_missing_instance_looks_like_policy_denial() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(60))).await;
    h.role("edge", EDGE_POLICY).await;
    let before = h.snapshot().await;

    let not_found = h.login("edge", "i-missing").await.unwrap_err();
    let policy_false = h.login("edge", "i-edge").await.unwrap_err();

    assert_eq!(not_found.public_message(), policy_false.public_message());
    assert_eq!(not_found.code(), policy_false.code());
    assert_eq!(h.snapshot().await, before);
}

#[tokio::test]
async fn test_unknown_role_is_invalid_role() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    let err = h.login("nope", "i-edge").await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidRole));
    assert_eq!(h.directory.calls(), 0);
}

#[tokio::test]
async fn test_directory_failures_are_internal() {
    let directory = edge_directory(TimeDelta::minutes(2))
        .with_fault(DirectoryResource::SecurityGroup, "sg-1", Fault::ServerError);
    let h = Harness::new(directory).await;
    h.role("edge", EDGE_POLICY).await;

    let err = h.login("edge", "i-edge").await.unwrap_err();
    assert!(matches!(err, AuthError::InternalError { .. }));
    assert_eq!(err.public_message(), "internal error");
}

#[tokio::test]
async fn test_cancelled_login_is_internal_not_denied() {
    let directory = edge_directory(TimeDelta::minutes(2))
        .with_fault(DirectoryResource::Instance, "i-edge", Fault::Hang);
    let h = Harness::new(directory).await;
    h.role("edge", EDGE_POLICY).await;

    let cancel = tokio_util::sync::CancellationToken::new();
    let ctx = RequestContext::with_cancellation(cancel.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = h
        .backend
        .login(
            &ctx,
            &LoginRequest::new("edge", "i-edge"),
            &ConnectionInfo::from_addr(INSTANCE_IP),
        )
        .await
        .unwrap_err();
    assert!(!err.is_denial());
    assert_eq!(err.code(), "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_login_input_validation() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    h.role("edge", EDGE_POLICY).await;
    let ctx = RequestContext::new();
    let conn = ConnectionInfo::from_addr(INSTANCE_IP);

    let missing_instance = LoginRequest {
        role: Some("edge".to_string()),
        ..Default::default()
    };
    let err = h.backend.login(&ctx, &missing_instance, &conn).await.unwrap_err();
    assert!(matches!(err, AuthError::MissingField { ref field } if field == "instance"));

    let err = h
        .backend
        .login(&ctx, &LoginRequest::new("edge", "i-edge"), &ConnectionInfo::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to get connection information"));
}

#[tokio::test]
async fn test_login_without_config_is_internal() {
    let h = Harness::unconfigured(edge_directory(TimeDelta::minutes(2)));
    let err = h.login("edge", "i-edge").await.unwrap_err();
    assert_eq!(err.code(), "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_non_boolean_policy_is_rejected_without_writes() {
    let h = Harness::new(MockDirectory::new()).await;
    let before = h.snapshot().await;

    let err = h
        .backend
        .create_role(RoleWriteRequest::new("bad").validator(r#""zone""#))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_FIELD_VALUE");
    assert_eq!(h.snapshot().await, before);
}

#[tokio::test]
async fn test_role_names_are_case_insensitive() {
    let h = Harness::new(MockDirectory::new()).await;
    let id = h.role("Foo", "true").await;

    let read = h.backend.read_role("foo").await.unwrap().unwrap();
    assert_eq!(read.data.name, "foo");
    assert_eq!(read.data.role_id, id);
    assert_eq!(h.backend.list_roles().await.unwrap(), vec!["foo"]);
    assert!(h.storage.keys().contains(&"role/foo".to_string()));
}

#[tokio::test]
async fn test_lease_ceiling_checks() {
    let h = Harness::new(MockDirectory::new()).await;

    let mut req = RoleWriteRequest::new("periodic").validator("true");
    req.token_period = Some(10_000);
    let err = h.backend.create_role(req).await.unwrap_err();
    assert!(err.to_string().contains("maximum lease TTL"));

    let mut req = RoleWriteRequest::new("long").validator("true");
    req.token_max_ttl = Some(10_000);
    let written = h.backend.create_role(req).await.unwrap();
    assert_eq!(written.warnings.len(), 1);
    assert_eq!(written.data.token.token_max_ttl, 10_000);
}

#[tokio::test]
async fn test_renewal_never_touches_directory_or_storage() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    h.role("edge", EDGE_POLICY).await;
    let auth = h.login("edge", "i-edge").await.unwrap();

    let calls = h.directory.calls();
    let before = h.snapshot().await;
    h.directory.remove_instance("i-edge");

    let renewed = h.backend.renew(&auth.renewal_state).await.unwrap();
    assert_eq!((renewed.ttl, renewed.max_ttl), (600, 1200));
    assert_eq!(h.directory.calls(), calls);
    assert_eq!(h.snapshot().await, before);

    h.backend
        .update_role_field("edge", RoleField::TokenTtl, json!(300))
        .await
        .unwrap();
    assert_eq!(h.backend.renew(&auth.renewal_state).await.unwrap().ttl, 300);

    h.backend.delete_role("edge").await.unwrap();
    let after_delete = h.snapshot().await;
    let err = h.backend.renew(&auth.renewal_state).await.unwrap_err();
    assert!(matches!(err, AuthError::RenewalDenied { .. }));
    assert_eq!(h.snapshot().await, after_delete);
}

#[tokio::test]
async fn test_approle_mode_logs_in_by_role_id() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    h.configure(true).await;
    let old_id = h.role("edge", EDGE_POLICY).await;
    let ctx = RequestContext::new();
    let conn = ConnectionInfo::from_addr(INSTANCE_IP);

    let auth = h
        .backend
        .login(&ctx, &LoginRequest::approle(&old_id, "i-edge"), &conn)
        .await
        .unwrap();
    assert_eq!(auth.renewal_state.role, "edge");

    let err = h
        .backend
        .login(&ctx, &LoginRequest::new("edge", "i-edge"), &conn)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MissingField { ref field } if field == "role_id"));

    h.backend.update_role_id("edge", "rotated-id").await.unwrap();
    let err = h
        .backend
        .login(&ctx, &LoginRequest::approle(&old_id, "i-edge"), &conn)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidRole));
    h.backend
        .login(&ctx, &LoginRequest::approle("rotated-id", "i-edge"), &conn)
        .await
        .unwrap();

    assert_eq!(
        h.backend.read_role_id("edge").await.unwrap().as_deref(),
        Some("rotated-id")
    );
}

#[tokio::test]
async fn test_alias_lookahead_resolves_nothing() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    let alias = h
        .backend
        .alias_lookahead(&LoginRequest::new("edge", "i-edge"))
        .await
        .unwrap();
    assert_eq!(alias, "i-edge");
    assert_eq!(h.directory.calls(), 0);
}

#[tokio::test]
async fn test_config_changes_rebuild_directory_client() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    h.role("edge", EDGE_POLICY).await;

    h.login("edge", "i-edge").await.unwrap();
    h.login("edge", "i-edge").await.unwrap();
    assert_eq!(h.factory.builds.load(Ordering::SeqCst), 1);

    h.configure(false).await;
    h.login("edge", "i-edge").await.unwrap();
    assert_eq!(h.factory.builds.load(Ordering::SeqCst), 2);

    h.backend.invalidate("config").await;
    h.login("edge", "i-edge").await.unwrap();
    assert_eq!(h.factory.builds.load(Ordering::SeqCst), 3);

    let view = h.backend.read_config().await.unwrap().unwrap();
    assert_eq!(view.api_endpoint, "https://api-ch-gva-2.exoscale.com/v2");
    assert!(!serde_json::to_string(&view).unwrap().contains("s3cr3t"));

    h.backend.delete_config().await.unwrap();
    assert!(h.backend.read_config().await.unwrap().is_none());
    assert_eq!(h.login("edge", "i-edge").await.unwrap_err().code(), "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_role_field_operations() {
    let h = Harness::new(MockDirectory::new()).await;
    h.role("web", "true").await;

    h.backend
        .update_role_field("web", RoleField::TokenBoundCidrs, json!(["10.0.0.0/8"]))
        .await
        .unwrap();
    assert_eq!(
        h.backend
            .read_role_field("web", RoleField::TokenBoundCidrs)
            .await
            .unwrap(),
        Some(json!(["10.0.0.0/8"]))
    );

    h.backend
        .delete_role_field("web", RoleField::TokenTtl)
        .await
        .unwrap();
    assert_eq!(
        h.backend.read_role_field("web", RoleField::TokenTtl).await.unwrap(),
        Some(json!(0))
    );

    let err = h
        .backend
        .delete_role_field("web", RoleField::Validator)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_FIELD_VALUE");

    let err = h
        .backend
        .update_role_field("web", RoleField::TokenNumUses, json!("many"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_FIELD_VALUE");

    let err = h
        .backend
        .update_role_field("ghost", RoleField::TokenTtl, json!(5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("doesn't exist"));
}

#[tokio::test]
async fn test_legacy_role_is_migrated_and_usable() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    put_json(
        h.storage.as_ref(),
        "role/legacy",
        &json!({
            "instance_match_ip": true,
            "instance_allowed_pool_ids": ["pool-1"],
            "instance_allowed_tags": null,
            "token_policies": ["edge"],
            "token_ttl": 600_000_000_000i64
        }),
    )
    .await
    .unwrap();

    let auth = h.login("legacy", "i-edge").await.unwrap();
    assert_eq!(auth.ttl, 600);

    let role = h.backend.read_role("legacy").await.unwrap().unwrap().data;
    assert!(role.validator.contains("instance_manager_id in [\"pool-1\"]"));
    assert!(!role.role_id.is_empty());
}

#[tokio::test]
async fn test_login_with_legacy_role_writes_nothing() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    put_json(
        h.storage.as_ref(),
        "role/legacy",
        &json!({"instance_match_ip": true}),
    )
    .await
    .unwrap();
    let before = h.snapshot().await;

    let err = h.login("legacy", "i-missing").await.unwrap_err();
    assert!(matches!(err, AuthError::AuthFailed { .. }));
    assert_eq!(h.snapshot().await, before);

    h.login("legacy", "i-edge").await.unwrap();
    assert_eq!(h.snapshot().await, before);
}

#[tokio::test]
async fn test_role_name_limits_match_between_write_and_login() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    let longest = "a".repeat(exo_core::MAX_ROLE_NAME_LEN);
    h.role(&longest, "true").await;
    h.login(&longest, "i-edge").await.unwrap();

    let too_long = "a".repeat(exo_core::MAX_ROLE_NAME_LEN + 1);
    let err = h
        .backend
        .create_role(RoleWriteRequest::new(too_long.as_str()).validator("true"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidFieldValue { ref field, .. } if field == "role_name"));
    assert!(h.backend.list_roles().await.unwrap().contains(&longest));
    assert_eq!(h.backend.list_roles().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalidating_role_prefix_keeps_logins_working() {
    let h = Harness::new(edge_directory(TimeDelta::minutes(2))).await;
    h.role("edge", EDGE_POLICY).await;
    h.backend.invalidate("role/edge").await;
    h.backend.invalidate("role/").await;
    h.backend.invalidate("salt").await;
    h.backend.invalidate("unrelated").await;
    h.login("edge", "i-edge").await.unwrap();
}
