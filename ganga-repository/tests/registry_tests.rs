use ganga_repository::{AttributeIndex, Layout, Registry, RepositoryConfig, RepositoryError};
use ganga_schema::{Item, ObjectRef, PluginRegistry, Schema, SchemaError, Value, Version};
use ganga_types::ObjectId;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ===== FIXTURES =====

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn plugins() -> Arc<PluginRegistry> {
    let plugins = PluginRegistry::new();
    plugins.register(
        Schema::new("jobs", "Job", Version::new(1, 0))
            .with_item("id", Item::simple(Value::None).protected())
            .with_item("name", Item::simple(""))
            .with_item("status", Item::simple("new"))
            .with_item("filesPerJob", Item::simple(10i64))
            .with_item("subjobs", Item::component_list("jobs")),
    );
    plugins
}

fn open(root: &Path, plugins: &Arc<PluginRegistry>) -> Arc<Registry> {
    init_tracing();
    let config = RepositoryConfig::new(root, "jobs")
        .with_heartbeat_interval(Duration::from_millis(200))
        .with_lock_poll_interval(Duration::from_millis(10))
        .with_write_access_timeout(Duration::from_millis(300));
    let registry = Registry::local(
        config,
        Arc::clone(plugins),
        Box::new(AttributeIndex::new(["name", "status"])),
    );
    registry.startup().unwrap();
    registry
}

fn job(plugins: &Arc<PluginRegistry>, name: &str) -> ObjectRef {
    let job = plugins.instantiate("jobs", "Job").unwrap();
    job.set_attribute("name", name).unwrap();
    job
}

fn text(value: Value) -> String {
    value.as_str().unwrap().to_string()
}

// ── Lazy loading ─────────────────────────────────────────────────

#[test]
fn cached_attributes_do_not_load_the_body() {
    let tmp = TempDir::new().unwrap();
    let plugins = plugins();
    let writer = open(tmp.path(), &plugins);
    let id = writer.add(&job(&plugins, "lazy")).unwrap();
    writer.shutdown().unwrap();

    let reader = open(tmp.path(), &plugins);
    let obj = reader.get(id).unwrap();
    assert!(!obj.is_loaded());
    assert_eq!(text(obj.get_attribute("name").unwrap()), "lazy");
    assert_eq!(obj.get_attribute("id").unwrap(), Value::Int(0));
    assert!(!reader.is_loaded(id));

    assert_eq!(obj.get_attribute("filesPerJob").unwrap(), Value::Int(10));
    assert!(obj.is_loaded());
    assert!(reader.is_loaded(id));
}

#[test]
fn missing_ids_are_reported() {
    let tmp = TempDir::new().unwrap();
    let registry = open(tmp.path(), &plugins());
    let err = registry.get(ObjectId::new(99)).unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound(id) if id == ObjectId::new(99)));
    assert!(registry.is_empty());
}

#[test]
fn unreadable_objects_are_listed_as_incomplete() {
    let tmp = TempDir::new().unwrap();
    let plugins = plugins();
    let writer = open(tmp.path(), &plugins);
    let id = writer.add(&job(&plugins, "fragile")).unwrap();
    writer.shutdown().unwrap();
    let layout = Layout::new(tmp.path(), "jobs", "data");
    std::fs::write(layout.data_path(id), "garbage").unwrap();

    let reader = open(tmp.path(), &plugins);
    let obj = reader.get(id).unwrap();
    let err = obj.get_attribute("filesPerJob").unwrap_err();
    assert!(matches!(err, SchemaError::RegistryAccess(_)));
    assert_eq!(reader.incomplete_ids(), vec![id]);
    assert!(matches!(reader.get(id), Err(RepositoryError::Incomplete(_))));
}

// ── Writes ───────────────────────────────────────────────────────

#[test]
fn changes_are_flushed_and_survive_reopening() {
    let tmp = TempDir::new().unwrap();
    let plugins = plugins();
    let registry = open(tmp.path(), &plugins);
    let first = registry.add(&job(&plugins, "first")).unwrap();
    let second = registry.add(&job(&plugins, "second")).unwrap();

    registry.get(first).unwrap().set_attribute("name", "renamed").unwrap();
    registry.flush_all().unwrap();
    // left for shutdown to write
    registry.get(second).unwrap().set_attribute("status", "running").unwrap();
    registry.shutdown().unwrap();

    let reopened = open(tmp.path(), &plugins);
    assert_eq!(reopened.ids(), vec![first, second]);
    let a = reopened.get(first).unwrap();
    let b = reopened.get(second).unwrap();
    assert_eq!(text(a.get_attribute("name").unwrap()), "renamed");
    assert_eq!(text(b.get_attribute("status").unwrap()), "running");
}

#[test]
fn writes_wait_for_the_other_session() {
    let tmp = TempDir::new().unwrap();
    let plugins = plugins();
    let owner = open(tmp.path(), &plugins);
    let id = owner.add(&job(&plugins, "shared")).unwrap();
    owner.release(id).unwrap();

    let other = open(tmp.path(), &plugins);
    owner.get(id).unwrap().set_attribute("status", "running").unwrap();
    assert!(other.get_lock_session(id).is_some());

    let theirs = other.get(id).unwrap();
    let started = Instant::now();
    let err = theirs.set_attribute("status", "killed").unwrap_err();
    assert!(matches!(err, SchemaError::RegistryAccess(_)));
    assert!(started.elapsed() >= Duration::from_millis(300));

    owner.release(id).unwrap();
    theirs.set_attribute("status", "killed").unwrap();
    other.flush(&[id]).unwrap();
}

#[test]
fn chosen_ids_are_reserved() {
    let tmp = TempDir::new().unwrap();
    let plugins = plugins();
    let registry = open(tmp.path(), &plugins);
    registry.add_with_id(&job(&plugins, "imported"), ObjectId::new(42)).unwrap();
    assert_eq!(
        registry.get(ObjectId::new(42)).unwrap().raw_attribute("id"),
        Some(Value::Int(42))
    );

    let err = registry
        .add_with_id(&job(&plugins, "again"), ObjectId::new(42))
        .unwrap_err();
    assert_eq!(err.kind(), "Locked");
    assert_eq!(registry.add(&job(&plugins, "next")).unwrap(), ObjectId::new(43));
}

#[test]
fn removed_objects_leave_disk_and_memory() {
    let tmp = TempDir::new().unwrap();
    let plugins = plugins();
    let registry = open(tmp.path(), &plugins);
    let id = registry.add(&job(&plugins, "temporary")).unwrap();
    registry.remove(id).unwrap();

    assert!(!registry.contains(id));
    let layout = Layout::new(tmp.path(), "jobs", "data");
    assert!(!layout.object_dir(id).exists());
    registry.shutdown().unwrap();
    assert!(open(tmp.path(), &plugins).is_empty());
}

#[test]
fn stopped_registry_refuses_work() {
    let plugins = plugins();
    let registry = Registry::transient("scratch");
    let err = registry.add(&job(&plugins, "early")).unwrap_err();
    assert_eq!(err.kind(), "NotStarted");
}

// ── Transient ────────────────────────────────────────────────────

#[test]
fn transient_registry_keeps_objects_in_memory() {
    let plugins = plugins();
    let registry = Registry::transient("scratch");
    registry.startup().unwrap();

    let a = registry.add(&job(&plugins, "a")).unwrap();
    let b = registry.add(&job(&plugins, "b")).unwrap();
    assert_eq!((a, b), (ObjectId::new(0), ObjectId::new(1)));

    let obj = registry.get(b).unwrap();
    obj.set_attribute("name", "changed").unwrap();
    assert!(obj.is_dirty());
    registry.flush_all().unwrap();
    assert!(!obj.is_dirty());

    registry.remove(a).unwrap();
    assert_eq!(registry.ids(), vec![b]);
    assert!(registry.other_sessions().is_empty());
    registry.shutdown().unwrap();
}
