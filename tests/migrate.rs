//! Legacy-layout migration, end to end.

mod common;

use common::{fresh_project, read_file, write_file};

use claude_wm::migrate::{
    LegacyCategory, MigrationOptions, apply_migration, plan_migration,
};
use claude_wm::ops::{status, update};
use claude_wm::merge::apply::CancelToken;
use claude_wm::project::assess;

fn seed_legacy(root: &std::path::Path) {
    let legacy = root.join(".claude-wm");
    write_file(&legacy, "system/settings.json", "{\"v\": 1}");
    write_file(&legacy, "system/commands/project/init.md", "# init (old)");
    write_file(&legacy, "user/theme.toml", "dark = true");
    write_file(&legacy, "runtime/session.json", "{}");
    write_file(&legacy, "cache/blob.bin", "xx");
    write_file(&legacy, "backup/old.zip", "zz");
    write_file(
        &legacy,
        "meta.json",
        r#"{"installed_at": "2023-01-15T08:30:00Z", "schema": 1}"#,
    );
    write_file(&legacy, "README.txt", "what is this");
}

#[test]
fn plan_classifies_every_legacy_path() {
    let (dir, _ctx) = fresh_project();
    seed_legacy(dir.path());

    let plan = plan_migration(&dir.path().join(".claude-wm")).unwrap();
    assert_eq!(plan.entries.len(), 8);
    assert_eq!(plan.n_migrate, 4, "system x2 + user + meta");
    assert_eq!(plan.n_ignore, 4, "runtime + cache + backup + README");

    let categories: Vec<(String, LegacyCategory)> = plan
        .entries
        .iter()
        .map(|e| (e.source.as_str().to_owned(), e.category))
        .collect();
    assert!(categories.contains(&("README.txt".to_owned(), LegacyCategory::Unknown)));
    assert!(categories.contains(&("runtime/session.json".to_owned(), LegacyCategory::Generated)));
}

#[test]
fn migration_yields_a_working_project() {
    let (dir, ctx) = fresh_project();
    seed_legacy(dir.path());

    let plan = plan_migration(&ctx.layout.legacy_dir()).unwrap();
    let outcome = apply_migration(&plan, &ctx.layout, MigrationOptions::default()).unwrap();
    assert_eq!(outcome.migrated, 4);
    assert_eq!(outcome.ignored, 4);

    // The migrated project assesses clean and supports normal operations.
    assert!(assess(&ctx.layout).unwrap().is_ready());
    assert_eq!(
        read_file(&ctx.layout.baseline_dir(), "settings.json"),
        "{\"v\": 1}"
    );
    assert_eq!(read_file(&ctx.layout.wm_dir(), "user/theme.toml"), "dark = true");

    let report = status::run(&ctx).unwrap();
    assert_eq!(report.state, "ready");
    // The migrated baseline diverges from the embedded templates, so an
    // update has work to do — and completes.
    update::run(
        &ctx,
        &claude_wm::ops::update::UpdateArgs::default(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(assess(&ctx.layout).unwrap().is_ready());
}

#[test]
fn archive_flag_renames_legacy_dir() {
    let (dir, ctx) = fresh_project();
    seed_legacy(dir.path());

    let plan = plan_migration(&ctx.layout.legacy_dir()).unwrap();
    let outcome = apply_migration(
        &plan,
        &ctx.layout,
        MigrationOptions {
            archive_legacy: true,
        },
    )
    .unwrap();

    assert!(!ctx.layout.legacy_dir().exists());
    let bak = outcome.archived_to.unwrap();
    assert!(bak.join("system/settings.json").exists());
}

#[test]
fn dry_run_plan_serializes() {
    let (dir, _ctx) = fresh_project();
    seed_legacy(dir.path());
    let plan = plan_migration(&dir.path().join(".claude-wm")).unwrap();
    let json = serde_json::to_string_pretty(&plan).unwrap();
    assert!(json.contains("system_template"));
    assert!(json.contains(".wm/baseline/settings.json"));
}
