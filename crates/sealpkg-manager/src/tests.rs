use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use httpmock::prelude::*;
use sealpkg_manifest::pack_directory;
use sealpkg_protocol::{
    ConfigError, ConfigValue, PackageError, PermissionKind, ResourceKind, ResourceReloader,
    ResourceSource,
};
use sealpkg_sandbox::SandboxedFs;

use super::*;

fn unique_test_root(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("{name}-{nanos}"))
}

/// Writes a package source tree under `root/src` and packs it into
/// `root/dist`. `extra` is appended after the `[package]` table.
fn package_archive(root: &Path, id: &str, version: &str, extra: &str) -> Result<PathBuf> {
    let dir_name = id.replace('/', "@");
    let source = root.join("src").join(format!("{dir_name}-{version}"));
    std::fs::create_dir_all(source.join("scripts"))?;
    std::fs::write(
        source.join("manifest.toml"),
        format!(
            "[package]\nid = \"{id}\"\nname = \"{id}\"\nversion = \"{version}\"\nauthors = [\"tester\"]\n{extra}"
        ),
    )?;
    std::fs::write(source.join("scripts/main.js"), "seal.ext.register();\n")?;
    let dest = root.join("dist").join(format!("{dir_name}-{version}.sealpkg"));
    pack_directory(&source, &dest)?;
    Ok(dest)
}

const SCRIPTS: &str = "[contents]\nscripts = [\"scripts/main.js\"]\n";

struct RecordingReloader {
    kind: ResourceKind,
    fail: AtomicBool,
    calls: parking_lot::Mutex<Vec<Vec<PackageId>>>,
}

impl RecordingReloader {
    fn new(kind: ResourceKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fail: AtomicBool::new(false),
            calls: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<PackageId>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ResourceReloader for RecordingReloader {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn reload(&self, sources: &[ResourceSource]) -> PackageResult<String> {
        self.calls
            .lock()
            .push(sources.iter().map(|s| s.package_id.clone()).collect());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PackageError::Reload("script engine rejected main.js".into()));
        }
        Ok(format!("{} sources", sources.len()))
    }
}

async fn manager_at(root: &Path) -> Result<PackageManager> {
    Ok(PackageManager::builder(root.join("state"))
        .host_version("1.5.0")
        .build()
        .await?)
}

#[tokio::test]
async fn install_registers_package_and_sandbox_denies_network() -> Result<()> {
    let root = unique_test_root("sealpkg-install");
    let archive = package_archive(&root, "demo/pkg", "1.0.0", SCRIPTS)?;
    let manager = manager_at(&root).await?;

    let outcome = manager.install(&archive).await?;
    assert!(outcome.success);
    assert!(!outcome.reload_needed);

    let id = PackageId::from("demo/pkg");
    let instance = manager.get(&id)?;
    assert_eq!(instance.state, PackageState::Installed);
    assert!(instance.install_path.join("manifest.toml").is_file());
    assert!(instance.install_path.join("scripts/main.js").is_file());
    assert!(instance.user_data_path.is_dir());
    assert!(instance.source_path.is_file());
    assert_eq!(instance.checksum.as_deref().map(str::len), Some(64));

    let registry = fs::read_to_string(manager.config().registry_file()).await?;
    assert!(registry.contains("demo/pkg"));
    assert!(registry.contains("\"installed\""));

    let sandbox = manager.sandbox(&id)?;
    let denied = sandbox.check_network("https://example.com/api").unwrap_err();
    assert_eq!(denied.permission, PermissionKind::Network);
    assert_eq!(denied.package_id, id);

    let files = SandboxedFs::new(sandbox);
    files.write("_userdata/notes.txt", "hi").await?;
    assert!(instance.user_data_path.join("notes.txt").is_file());

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn enable_reports_reload_hints_and_disable_flips_state() -> Result<()> {
    let root = unique_test_root("sealpkg-enable");
    let archive = package_archive(&root, "demo/pkg", "1.0.0", SCRIPTS)?;
    let manager = manager_at(&root).await?;
    manager.install(&archive).await?;
    let id = PackageId::from("demo/pkg");

    let enabled = manager.enable(&id).await?;
    assert!(enabled.success);
    assert!(enabled.reload_needed);
    assert_eq!(enabled.reload_hints, vec!["scripts"]);
    assert_eq!(manager.get(&id)?.state, PackageState::Enabled);
    assert_eq!(manager.enabled_sources(ResourceKind::Scripts).len(), 1);

    let again = manager.enable(&id).await?;
    assert!(again.success);
    assert!(!again.reload_needed);

    let disabled = manager.disable(&id).await?;
    assert!(disabled.reload_needed);
    assert_eq!(manager.get(&id)?.state, PackageState::Disabled);
    assert!(manager.enabled_sources(ResourceKind::Scripts).is_empty());

    let noop = manager.disable(&id).await?;
    assert!(noop.success);
    assert!(!noop.reload_needed);
    assert_eq!(manager.get(&id)?.state, PackageState::Disabled);

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn duplicate_and_incompatible_installs_are_rejected() -> Result<()> {
    let root = unique_test_root("sealpkg-reject");
    let archive = package_archive(&root, "demo/pkg", "1.0.0", "")?;
    let future = package_archive(
        &root,
        "demo/future",
        "1.0.0",
        "[package.seal]\nmin_version = \"99.0.0\"\n",
    )?;
    let manager = manager_at(&root).await?;

    manager.install(&archive).await?;
    assert!(matches!(
        manager.install(&archive).await,
        Err(PackageError::AlreadyInstalled(id)) if id.as_str() == "demo/pkg"
    ));
    assert!(matches!(
        manager.install(&future).await,
        Err(PackageError::HostIncompatible { .. })
    ));

    assert_eq!(manager.list().len(), 1);
    assert!(!manager.config().install_path(&PackageId::from("demo/future")).exists());

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn config_is_validated_and_mirrored_to_user_data() -> Result<()> {
    let root = unique_test_root("sealpkg-config");
    let archive = package_archive(
        &root,
        "demo/pkg",
        "1.0.0",
        "[config.level]\ntype = \"integer\"\nmin = 1\nmax = 5\ndefault = 3\n\n[config.greeting]\ntype = \"string\"\ndefault = \"hello\"\n",
    )?;
    let manager = manager_at(&root).await?;
    manager.install(&archive).await?;
    let id = PackageId::from("demo/pkg");

    let config = manager.get_config(&id)?;
    assert_eq!(config.get("level"), Some(&ConfigValue::Integer(3)));
    let mirror = manager.get(&id)?.user_data_path.join("config.json");
    assert!(mirror.is_file());

    let mut update = ConfigMap::new();
    update.insert("level".into(), ConfigValue::Integer(10));
    match manager.set_config(&id, update).await {
        Err(PackageError::Config(ConfigError::AboveMaximum { key, .. })) => {
            assert_eq!(key, "level")
        }
        other => panic!("expected range error, got {other:?}"),
    }
    assert_eq!(
        manager.get_config(&id)?.get("level"),
        Some(&ConfigValue::Integer(3))
    );

    let mut update = ConfigMap::new();
    update.insert("level".into(), ConfigValue::Integer(4));
    let accepted = manager.set_config(&id, update).await?;
    assert_eq!(accepted.get("level"), Some(&ConfigValue::Integer(4)));
    assert_eq!(
        accepted.get("greeting"),
        Some(&ConfigValue::String("hello".into()))
    );

    let written: ConfigMap = serde_json::from_slice(&fs::read(&mirror).await?)?;
    assert_eq!(written, accepted);
    assert_eq!(manager.config_schema(&id)?.len(), 2);

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn keep_data_uninstall_preserves_user_data_for_reinstall() -> Result<()> {
    let root = unique_test_root("sealpkg-keepdata");
    let archive = package_archive(&root, "demo/pkg", "1.0.0", SCRIPTS)?;
    let manager = manager_at(&root).await?;
    manager.install(&archive).await?;
    let id = PackageId::from("demo/pkg");
    let instance = manager.get(&id)?;
    fs::write(instance.user_data_path.join("test.txt"), "saved").await?;

    let outcome = manager.uninstall(&id, UninstallMode::KeepData).await?;
    assert!(outcome.success);
    assert!(matches!(manager.get(&id), Err(PackageError::NotFound(_))));
    assert!(!instance.install_path.exists());
    assert!(!instance.source_path.exists());
    assert_eq!(
        fs::read_to_string(instance.user_data_path.join("test.txt")).await?,
        "saved"
    );

    manager.install(&archive).await?;
    assert!(manager.get(&id)?.user_data_path.join("test.txt").is_file());

    manager.uninstall(&id, UninstallMode::Full).await?;
    assert!(!manager.config().data_path(&id).exists());
    assert!(manager.list().is_empty());

    let registry = fs::read_to_string(manager.config().registry_file()).await?;
    assert!(!registry.contains("demo/pkg"));

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn disable_only_uninstall_keeps_files_and_record() -> Result<()> {
    let root = unique_test_root("sealpkg-disableonly");
    let archive = package_archive(&root, "demo/pkg", "1.0.0", SCRIPTS)?;
    let manager = manager_at(&root).await?;
    manager.install(&archive).await?;
    let id = PackageId::from("demo/pkg");
    manager.enable(&id).await?;

    let outcome = manager.uninstall(&id, UninstallMode::DisableOnly).await?;
    assert!(outcome.reload_needed);
    let instance = manager.get(&id)?;
    assert_eq!(instance.state, PackageState::Disabled);
    assert!(instance.install_path.is_dir());

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn dependencies_gate_install_and_are_enabled_together() -> Result<()> {
    let root = unique_test_root("sealpkg-deps");
    let lib = package_archive(&root, "demo/lib", "1.2.0", SCRIPTS)?;
    let app = package_archive(
        &root,
        "demo/app",
        "1.0.0",
        "[dependencies]\n\"demo/lib\" = \"^1.0\"\n",
    )?;
    let manager = manager_at(&root).await?;

    match manager.install(&app).await {
        Err(PackageError::Dependency { issues, .. }) => {
            assert_eq!(issues[0].dependency.as_str(), "demo/lib");
            assert!(issues[0].installed.is_none());
        }
        other => panic!("expected dependency error, got {other:?}"),
    }

    manager.install(&lib).await?;
    manager.install(&app).await?;

    let app_id = PackageId::from("demo/app");
    let lib_id = PackageId::from("demo/lib");
    let outcome = manager.enable(&app_id).await?;
    assert!(outcome.message.contains("demo/lib"));
    assert_eq!(outcome.reload_hints, vec!["scripts"]);
    assert_eq!(manager.get(&lib_id)?.state, PackageState::Enabled);

    assert!(matches!(
        manager.disable(&lib_id).await,
        Err(PackageError::DependentsEnabled { dependents, .. }) if dependents == vec![app_id.clone()]
    ));
    assert!(matches!(
        manager.uninstall(&lib_id, UninstallMode::Full).await,
        Err(PackageError::DependentsEnabled { .. })
    ));
    assert!(manager.get(&lib_id)?.install_path.is_dir());

    manager.disable(&app_id).await?;
    manager.disable(&lib_id).await?;
    assert_eq!(manager.get(&lib_id)?.state, PackageState::Disabled);

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn reload_failure_marks_error_until_a_clean_reload() -> Result<()> {
    let root = unique_test_root("sealpkg-reload");
    let archive = package_archive(&root, "demo/pkg", "1.0.0", SCRIPTS)?;
    let scripts = RecordingReloader::new(ResourceKind::Scripts);
    let manager = PackageManager::builder(root.join("state"))
        .host_version("1.5.0")
        .reloader(scripts.clone())
        .build()
        .await?;
    manager.install(&archive).await?;
    let id = PackageId::from("demo/pkg");
    manager.enable(&id).await?;
    assert_eq!(manager.get(&id)?.pending_reload, vec![ResourceKind::Scripts]);

    scripts.fail.store(true, Ordering::SeqCst);
    let failed = manager.reload(&id).await?;
    assert!(!failed.success);
    assert!(failed.reloaded_items["scripts"].starts_with("failed:"));
    let instance = manager.get(&id)?;
    assert_eq!(instance.state, PackageState::Error);
    assert!(instance.err_text.is_some_and(|text| text.contains("main.js")));
    assert!(matches!(
        manager.enable(&id).await,
        Err(PackageError::InvalidState(_))
    ));

    scripts.fail.store(false, Ordering::SeqCst);
    let recovered = manager.reload(&id).await?;
    assert!(recovered.success);
    assert_eq!(recovered.reloaded_items["scripts"], "1 sources");
    let instance = manager.get(&id)?;
    assert_eq!(instance.state, PackageState::Enabled);
    assert!(instance.err_text.is_none());
    assert!(instance.pending_reload.is_empty());
    assert_eq!(scripts.calls().len(), 2);

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn unregistered_kind_is_reported_as_restart_hint() -> Result<()> {
    let root = unique_test_root("sealpkg-restart");
    let archive = package_archive(
        &root,
        "demo/help",
        "1.0.0",
        "[contents]\nhelpdoc = [\"help/rules.json\"]\n",
    )?;
    let manager = manager_at(&root).await?;
    manager.install(&archive).await?;
    let id = PackageId::from("demo/help");
    manager.enable(&id).await?;

    let outcome = manager.reload(&id).await?;
    assert!(outcome.success);
    assert!(outcome.need_restart);
    assert_eq!(outcome.restart_hints, vec!["helpdoc"]);
    assert!(outcome.reloaded_items.is_empty());
    assert_eq!(
        manager.get(&id)?.pending_reload,
        vec![ResourceKind::HelpDocs]
    );

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn reload_rejects_packages_that_are_not_enabled() -> Result<()> {
    let root = unique_test_root("sealpkg-reload-installed");
    let archive = package_archive(&root, "demo/pkg", "1.0.0", SCRIPTS)?;
    let scripts = RecordingReloader::new(ResourceKind::Scripts);
    let manager = PackageManager::builder(root.join("state"))
        .reloader(scripts.clone())
        .build()
        .await?;
    manager.install(&archive).await?;

    let outcome = manager.reload(&PackageId::from("demo/pkg")).await?;
    assert!(!outcome.success);
    assert!(scripts.calls().is_empty());
    assert!(matches!(
        manager.reload(&PackageId::from("demo/missing")).await,
        Err(PackageError::NotFound(_))
    ));

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn reload_all_calls_each_reloader_once_with_every_enabled_source() -> Result<()> {
    let root = unique_test_root("sealpkg-reload-all");
    let first = package_archive(&root, "demo/one", "1.0.0", SCRIPTS)?;
    let second = package_archive(&root, "demo/two", "1.0.0", SCRIPTS)?;
    let third = package_archive(&root, "demo/three", "1.0.0", SCRIPTS)?;
    let scripts = RecordingReloader::new(ResourceKind::Scripts);
    let manager = PackageManager::builder(root.join("state"))
        .reloader(scripts.clone())
        .build()
        .await?;
    for archive in [&first, &second, &third] {
        manager.install(archive).await?;
    }
    manager.enable(&PackageId::from("demo/one")).await?;
    manager.enable(&PackageId::from("demo/two")).await?;

    let outcome = manager.reload_all().await?;
    assert!(outcome.success);
    assert_eq!(
        scripts.calls(),
        vec![vec![PackageId::from("demo/one"), PackageId::from("demo/two")]]
    );

    scripts.fail.store(true, Ordering::SeqCst);
    let failed = manager.reload_all().await?;
    assert!(!failed.success);
    assert_eq!(manager.get(&PackageId::from("demo/one"))?.state, PackageState::Error);
    assert_eq!(manager.get(&PackageId::from("demo/two"))?.state, PackageState::Error);
    assert_eq!(
        manager.get(&PackageId::from("demo/three"))?.state,
        PackageState::Installed
    );

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn registry_is_restored_and_broken_manifests_become_errors() -> Result<()> {
    let root = unique_test_root("sealpkg-restore");
    let good = package_archive(&root, "demo/good", "1.0.0", SCRIPTS)?;
    let bad = package_archive(&root, "demo/bad", "1.0.0", SCRIPTS)?;
    let good_id = PackageId::from("demo/good");
    let bad_id = PackageId::from("demo/bad");

    {
        let manager = manager_at(&root).await?;
        manager.install(&good).await?;
        manager.install(&bad).await?;
        manager.enable(&good_id).await?;
        let mut update = ConfigMap::new();
        update.insert("anything".into(), ConfigValue::Boolean(true));
        // No schema: unknown keys are kept as-is.
        manager.set_config(&good_id, update).await?;
        fs::write(
            manager.get(&bad_id)?.install_path.join("manifest.toml"),
            "[package\nbroken",
        )
        .await?;
    }

    let manager = manager_at(&root).await?;
    assert_eq!(manager.list().len(), 2);

    let restored = manager.get(&good_id)?;
    assert_eq!(restored.state, PackageState::Enabled);
    assert_eq!(restored.pending_reload, vec![ResourceKind::Scripts]);
    assert_eq!(
        restored.config.get("anything"),
        Some(&ConfigValue::Boolean(true))
    );
    assert!(restored.descriptor.is_some());

    let broken = manager.get(&bad_id)?;
    assert_eq!(broken.state, PackageState::Error);
    assert!(broken.descriptor.is_none());
    assert!(broken.err_text.is_some());
    assert!(matches!(
        manager.enable(&bad_id).await,
        Err(PackageError::InvalidState(_))
    ));
    assert!(manager.sandbox(&bad_id).is_err());

    manager.uninstall(&bad_id, UninstallMode::Full).await?;
    assert_eq!(manager.list().len(), 1);

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn install_from_url_downloads_then_installs() -> Result<()> {
    let root = unique_test_root("sealpkg-url");
    let archive = package_archive(&root, "demo/remote", "2.0.0", SCRIPTS)?;
    let bytes = std::fs::read(&archive)?;

    let server = MockServer::start();
    let served = server.mock(|when, then| {
        when.method(GET).path("/packages/remote.sealpkg");
        then.status(200).body(bytes.clone());
    });
    let missing = server.mock(|when, then| {
        when.method(GET).path("/packages/missing.sealpkg");
        then.status(404);
    });

    let manager = manager_at(&root).await?;
    assert!(matches!(
        manager
            .install_from_url(&server.url("/packages/missing.sealpkg"))
            .await,
        Err(PackageError::Download(_))
    ));
    assert!(manager.list().is_empty());

    let outcome = manager
        .install_from_url(&server.url("/packages/remote.sealpkg"))
        .await?;
    assert!(outcome.message.contains("2.0.0"));
    assert_eq!(
        manager.get(&PackageId::from("demo/remote"))?.state,
        PackageState::Installed
    );

    let mut leftovers = fs::read_dir(manager.config().staging_dir()).await?;
    assert!(leftovers.next_entry().await?.is_none());

    served.assert_calls(1);
    missing.assert_calls(1);
    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn oversized_download_is_refused() -> Result<()> {
    let root = unique_test_root("sealpkg-url-limit");
    let server = MockServer::start();
    let _big = server.mock(|when, then| {
        when.method(GET).path("/big.sealpkg");
        then.status(200).body(vec![0u8; 4096]);
    });

    let manager = PackageManager::builder(root.join("state"))
        .max_download_bytes(1024)
        .build()
        .await?;
    match manager.install_from_url(&server.url("/big.sealpkg")).await {
        Err(PackageError::Download(message)) => assert!(message.contains("1024")),
        other => panic!("expected size limit error, got {other:?}"),
    }
    assert!(manager.list().is_empty());

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn stalled_download_times_out_without_side_effects() -> Result<()> {
    let root = unique_test_root("sealpkg-url-timeout");
    let archive = package_archive(&root, "demo/slow", "1.0.0", SCRIPTS)?;
    let bytes = std::fs::read(&archive)?;

    let server = MockServer::start();
    let slow = server.mock(|when, then| {
        when.method(GET).path("/slow.sealpkg");
        then.status(200)
            .body(bytes.clone())
            .delay(Duration::from_secs(3));
    });

    let manager = PackageManager::builder(root.join("state"))
        .host_version("1.5.0")
        .download_timeout(Duration::from_secs(1))
        .build()
        .await?;
    match manager.install_from_url(&server.url("/slow.sealpkg")).await {
        Err(PackageError::Download(_)) => {}
        other => panic!("expected download timeout, got {other:?}"),
    }
    slow.assert_calls(1);

    assert!(manager.list().is_empty());
    let mut leftovers = fs::read_dir(manager.config().staging_dir()).await?;
    assert!(leftovers.next_entry().await?.is_none());
    let mut installed = fs::read_dir(manager.config().packages_dir()).await?;
    assert!(installed.next_entry().await?.is_none());

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn failed_registry_write_restores_previous_state() -> Result<()> {
    let root = unique_test_root("sealpkg-commit-rollback");
    let archive = package_archive(&root, "demo/pkg", "1.0.0", SCRIPTS)?;
    let manager = manager_at(&root).await?;
    manager.install(&archive).await?;
    let id = PackageId::from("demo/pkg");
    let before = manager.list();

    // A non-empty directory in place of the registry file makes the
    // atomic rename fail.
    let registry = manager.config().registry_file();
    fs::remove_file(&registry).await?;
    fs::create_dir_all(registry.join("blocker")).await?;

    assert!(matches!(manager.enable(&id).await, Err(PackageError::Io(_))));
    assert_eq!(manager.get(&id)?.state, PackageState::Installed);
    assert!(manager.get(&id)?.pending_reload.is_empty());
    assert!(manager.enabled_sources(ResourceKind::Scripts).is_empty());
    assert_eq!(manager.list().len(), before.len());

    let mut config = manager.get_config(&id)?;
    config.insert("extra".to_owned(), ConfigValue::Boolean(true));
    assert!(manager.set_config(&id, config).await.is_err());
    assert!(!manager.get_config(&id)?.contains_key("extra"));

    fs::remove_dir_all(&registry).await?;
    manager.enable(&id).await?;
    assert_eq!(manager.get(&id)?.state, PackageState::Enabled);
    assert!(fs::read_to_string(&registry).await?.contains("\"enabled\""));

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

/// Accepts any two-segment id, including ones whose directory names collide.
#[derive(Debug)]
struct AnyTwoSegments;

impl PackageIdRule for AnyTwoSegments {
    fn check(&self, id: &str) -> Result<(), String> {
        match id.split_once('/') {
            Some((author, name)) if !author.is_empty() && !name.is_empty() => Ok(()),
            _ => Err("expected author/name".to_owned()),
        }
    }
}

#[tokio::test]
async fn ids_sharing_a_directory_cannot_overwrite_each_other() -> Result<()> {
    let root = unique_test_root("sealpkg-dir-collision");
    let first_archive = package_archive(&root, "a@b/c", "1.0.0", SCRIPTS)?;
    let second_archive = package_archive(&root, "a/b@c", "1.0.1", SCRIPTS)?;
    let manager = PackageManager::builder(root.join("state"))
        .host_version("1.5.0")
        .id_rule(Arc::new(AnyTwoSegments))
        .build()
        .await?;

    manager.install(&first_archive).await?;
    let first = manager.get(&PackageId::from("a@b/c"))?;

    assert!(matches!(
        manager.install(&second_archive).await,
        Err(PackageError::InvalidState(_))
    ));
    let manifest = fs::read_to_string(first.install_path.join("manifest.toml")).await?;
    assert!(manifest.contains("id = \"a@b/c\""));
    assert!(first.user_data_path.is_dir());
    assert!(first.source_path.is_file());
    assert_eq!(manager.list().len(), 1);
    assert!(manager.get(&PackageId::from("a/b@c")).is_err());

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn archives_expanding_past_the_limit_are_refused() -> Result<()> {
    let root = unique_test_root("sealpkg-unpack-limit");
    let archive = package_archive(&root, "demo/huge", "1.0.0", SCRIPTS)?;
    let manager = PackageManager::builder(root.join("state"))
        .host_version("1.5.0")
        .max_unpacked_bytes(16)
        .build()
        .await?;

    assert!(matches!(
        manager.install(&archive).await,
        Err(PackageError::MalformedArchive(_))
    ));
    assert!(manager.list().is_empty());
    let mut leftovers = fs::read_dir(manager.config().staging_dir()).await?;
    assert!(leftovers.next_entry().await?.is_none());
    let mut installed = fs::read_dir(manager.config().packages_dir()).await?;
    assert!(installed.next_entry().await?.is_none());

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}
