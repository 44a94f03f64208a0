//! Tests for the sync planner.

use std::collections::HashSet;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use tempfile::TempDir;

use super::*;
use crate::naming::NamingMode;
use crate::test_helpers::{file_with_content, product, write_local};
use crate::types::{Checksum, FileId};

const CONTENT: &[u8] = b"some file content";

fn t(days: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + ChronoDuration::days(days)
}

fn planner(root: &Path, use_checksums: bool) -> SyncPlanner {
    SyncPlanner::new(root, PathResolver::default(), use_checksums)
}

fn example_product(last_modified: DateTime<Utc>) -> Product {
    product(
        "100",
        "Example Book",
        "Example Co",
        vec![file_with_content("1", "book.pdf", last_modified, CONTENT)],
    )
}

fn target(root: &Path) -> PathBuf {
    root.join("Example Co").join("Example Book").join("book.pdf")
}

// -----------------------------------------------------------------------
// Action decisions
// -----------------------------------------------------------------------

#[tokio::test]
async fn missing_local_file_is_created() {
    let dir = TempDir::new().unwrap();
    let plan = planner(dir.path(), false).plan(&[example_product(t(0))]).await;

    assert_eq!(plan.tasks.len(), 1);
    assert_eq!(plan.tasks[0].action(), TaskAction::Create);
    assert_eq!(plan.tasks[0].target_path, target(dir.path()));
}

#[tokio::test]
async fn outdated_local_file_is_updated() {
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), CONTENT, t(0));

    let plan = planner(dir.path(), false).plan(&[example_product(t(1))]).await;

    assert_eq!(plan.tasks[0].action(), TaskAction::Update);
}

#[tokio::test]
async fn newer_local_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), CONTENT, t(5));

    let plan = planner(dir.path(), false).plan(&[example_product(t(1))]).await;

    assert_eq!(plan.tasks[0].action(), TaskAction::Skip);
}

#[tokio::test]
async fn equal_timestamps_are_up_to_date() {
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), CONTENT, t(1));

    let plan = planner(dir.path(), false).plan(&[example_product(t(1))]).await;

    assert_eq!(plan.tasks[0].action(), TaskAction::Skip);
}

#[tokio::test]
async fn sub_second_differences_are_ignored() {
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), CONTENT, t(1));

    let remote = t(1) + ChronoDuration::milliseconds(400);
    let plan = planner(dir.path(), false).plan(&[example_product(remote)]).await;

    assert_eq!(plan.tasks[0].action(), TaskAction::Skip);
}

#[tokio::test]
async fn checksum_mismatch_forces_update_despite_older_remote() {
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), b"locally corrupted", t(5));

    let plan = planner(dir.path(), true).plan(&[example_product(t(1))]).await;

    assert_eq!(plan.tasks[0].action(), TaskAction::Update);
}

#[tokio::test]
async fn checksum_mismatch_is_ignored_when_checksums_disabled() {
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), b"locally corrupted", t(5));

    let plan = planner(dir.path(), false).plan(&[example_product(t(1))]).await;

    assert_eq!(plan.tasks[0].action(), TaskAction::Skip);
}

#[tokio::test]
async fn matching_checksum_is_skipped() {
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), CONTENT, t(5));

    let plan = planner(dir.path(), true).plan(&[example_product(t(1))]).await;

    assert_eq!(plan.tasks[0].action(), TaskAction::Skip);
}

#[tokio::test]
async fn remote_without_checksum_is_skipped() {
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), b"anything", t(5));

    let mut p = example_product(t(1));
    p.files[0].checksum = None;
    let plan = planner(dir.path(), true).plan(&[p]).await;

    assert_eq!(plan.tasks[0].action(), TaskAction::Skip);
}

#[tokio::test]
async fn example_scenario_single_update() {
    // "Example Co" / book.pdf, checksum abc123, remote T2, local T1 < T2, no checksums
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), CONTENT, t(1));
    let mut p = example_product(t(2));
    p.files[0].checksum = Some(Checksum::md5("abc123"));

    let plan = planner(dir.path(), false).plan(&[p]).await;

    assert_eq!(plan.count(TaskAction::Update), 1);
    assert_eq!(plan.count(TaskAction::Create), 0);
    assert_eq!(plan.count(TaskAction::Skip), 0);
}

// -----------------------------------------------------------------------
// Planning errors
// -----------------------------------------------------------------------

#[tokio::test]
async fn malformed_entry_does_not_abort_planning() {
    let dir = TempDir::new().unwrap();
    let mut broken = file_with_content("2", "broken.pdf", t(0), CONTENT);
    broken.last_modified = None;
    let good = file_with_content("3", "good.pdf", t(0), CONTENT);
    let p = product("100", "Book", "Pub", vec![broken, good]);

    let plan = planner(dir.path(), false).plan(&[p]).await;

    assert_eq!(plan.tasks.len(), 1);
    assert_eq!(plan.tasks[0].source.id, FileId::new("3"));
    assert_eq!(plan.planning_errors.len(), 1);
    assert!(matches!(
        plan.planning_errors[0],
        PlanningError::MalformedEntry { .. }
    ));
}

#[tokio::test]
async fn unresolvable_name_is_a_planning_error() {
    let dir = TempDir::new().unwrap();
    let p = product(
        "100",
        "Book",
        "Pub",
        vec![file_with_content("2", "???", t(0), CONTENT)],
    );

    let plan = planner(dir.path(), false).plan(&[p]).await;

    assert!(plan.tasks.is_empty());
    assert!(matches!(
        plan.planning_errors[0],
        PlanningError::UnresolvablePath { .. }
    ));
}

#[tokio::test]
async fn directory_at_target_is_a_planning_error() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(target(dir.path())).unwrap();

    let plan = planner(dir.path(), false).plan(&[example_product(t(0))]).await;

    assert!(plan.tasks.is_empty());
    assert!(matches!(
        plan.planning_errors[0],
        PlanningError::LocalInspection { .. }
    ));
}

// -----------------------------------------------------------------------
// Whole-plan properties
// -----------------------------------------------------------------------

#[tokio::test]
async fn target_paths_are_unique_within_a_plan() {
    let dir = TempDir::new().unwrap();
    let p = product(
        "100",
        "Book",
        "Pub",
        vec![
            file_with_content("1", "map.pdf", t(0), CONTENT),
            file_with_content("2", "Map.pdf", t(0), CONTENT),
            file_with_content("3", "map?.pdf", t(0), CONTENT),
        ],
    );

    let plan = planner(dir.path(), false).plan(&[p]).await;
    let unique: HashSet<_> = plan.tasks.iter().map(|t| &t.target_path).collect();

    assert_eq!(unique.len(), plan.tasks.len());
    assert_eq!(plan.tasks.len(), 3);
}

#[tokio::test]
async fn same_product_name_from_two_publishers_without_publisher_dirs() {
    let dir = TempDir::new().unwrap();
    let products = vec![
        product(
            "10",
            "Core Rules",
            "Pub A",
            vec![file_with_content("1", "rules.pdf", t(0), CONTENT)],
        ),
        product(
            "20",
            "Core Rules",
            "Pub B",
            vec![file_with_content("2", "rules.pdf", t(0), CONTENT)],
        ),
    ];
    let planner = SyncPlanner::new(
        dir.path(),
        PathResolver::new(NamingMode::Friendly, true),
        false,
    );

    let plan = planner.plan(&products).await;
    let paths: Vec<_> = plan.tasks.iter().map(|t| t.target_path.clone()).collect();

    assert!(plan.planning_errors.is_empty());
    assert_eq!(
        paths,
        vec![
            dir.path().join("Core Rules [10]").join("rules.pdf"),
            dir.path().join("Core Rules [20]").join("rules.pdf"),
        ]
    );
}

#[tokio::test]
async fn same_named_products_of_one_publisher_get_distinct_directories() {
    let dir = TempDir::new().unwrap();
    let first = product(
        "7",
        "Starter Set",
        "Pub",
        vec![file_with_content("1", "set.pdf", t(0), CONTENT)],
    );
    let second = product(
        "8",
        "starter set",
        "Pub",
        vec![
            file_with_content("2", "SET.pdf", t(0), CONTENT),
            file_with_content("3", "maps.pdf", t(0), CONTENT),
        ],
    );
    let unrelated = example_product(t(0));

    let forward = planner(dir.path(), false)
        .plan(&[first.clone(), second.clone(), unrelated.clone()])
        .await;
    let backward = planner(dir.path(), false)
        .plan(&[unrelated, second, first])
        .await;

    let mut a: Vec<_> = forward.tasks.iter().map(|t| t.target_path.clone()).collect();
    let mut b: Vec<_> = backward.tasks.iter().map(|t| t.target_path.clone()).collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(a.len(), 4);
    let unique: HashSet<_> = a.iter().map(|p| p.to_string_lossy().to_lowercase()).collect();
    assert_eq!(unique.len(), 4);
    // The whole product moves, not just the clashing file
    assert!(a.contains(&dir.path().join("Pub").join("starter set [8]").join("maps.pdf")));
    assert!(a.contains(&dir.path().join("Pub").join("Starter Set [7]").join("set.pdf")));
    assert!(a.contains(&target(dir.path())));
}

#[tokio::test]
async fn duplicated_catalog_listing_is_planned_once() {
    let dir = TempDir::new().unwrap();
    let p = example_product(t(0));

    let plan = planner(dir.path(), false).plan(&[p.clone(), p]).await;

    assert_eq!(plan.tasks.len(), 1);
    assert_eq!(plan.planning_errors.len(), 1);
    assert!(matches!(
        plan.planning_errors[0],
        PlanningError::UnresolvablePath { .. }
    ));
}

#[tokio::test]
async fn entry_without_file_id_is_malformed_but_not_stale() {
    let dir = TempDir::new().unwrap();
    let kept = dir.path().join("Pub").join("Book").join("old.pdf");
    write_local(&kept, CONTENT, t(0));
    let no_id = file_with_content("", "old.pdf", t(1), CONTENT);
    let good = file_with_content("4", "new.pdf", t(1), CONTENT);
    let p = product("100", "Book", "Pub", vec![no_id, good]);

    let plan = planner(dir.path(), false).plan(&[p]).await;

    assert_eq!(plan.tasks.len(), 1);
    assert_eq!(plan.tasks[0].source.id, FileId::new("4"));
    assert!(matches!(
        plan.planning_errors[..],
        [PlanningError::MalformedEntry { .. }]
    ));
    assert!(plan.stale_entries.is_empty());
    assert!(kept.exists());
}

#[tokio::test]
async fn replanning_unchanged_tree_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let products = vec![example_product(t(0))];
    let planner = planner(dir.path(), true);

    let first = planner.plan(&products).await;
    assert_eq!(first.count(TaskAction::Create), 1);

    // Simulate the download having happened now
    write_local(&first.tasks[0].target_path, CONTENT, Utc::now());

    let second = planner.plan(&products).await;
    assert_eq!(second.count(TaskAction::Create), 0);
    assert_eq!(second.count(TaskAction::Update), 0);
    assert_eq!(second.count(TaskAction::Skip), 1);
}

#[tokio::test]
async fn stale_entries_are_reported_not_deleted() {
    let dir = TempDir::new().unwrap();
    let orphan = dir.path().join("Old Pub").join("Gone").join("old.pdf");
    write_local(&orphan, b"old", t(0));
    write_local(&target(dir.path()), CONTENT, t(5));
    let partial = dir.path().join("Example Co").join(".drpg-book.pdf.x1y2.part");
    write_local(&partial, b"half", t(0));

    let plan = planner(dir.path(), false).plan(&[example_product(t(1))]).await;

    assert_eq!(plan.stale_entries, vec![orphan.clone()]);
    assert!(orphan.exists());
}

#[tokio::test]
async fn malformed_entry_with_resolvable_path_is_not_stale() {
    let dir = TempDir::new().unwrap();
    write_local(&target(dir.path()), CONTENT, t(5));
    let mut p = example_product(t(1));
    p.files[0].last_modified = None;

    let plan = planner(dir.path(), false).plan(&[p]).await;

    assert!(plan.stale_entries.is_empty());
    assert_eq!(plan.planning_errors.len(), 1);
}

#[tokio::test]
async fn compatibility_mode_targets_quirky_paths() {
    let dir = TempDir::new().unwrap();
    let p = product(
        "100",
        "Tom's Book (2e)",
        "Bob&#39;s Games",
        vec![file_with_content("1", "book.pdf", t(0), CONTENT)],
    );
    let planner = SyncPlanner::new(
        dir.path(),
        PathResolver::new(NamingMode::Compatibility, false),
        false,
    );

    let plan = planner.plan(&[p]).await;

    assert_eq!(
        plan.tasks[0].target_path,
        dir.path()
            .join("Bob__39_s Games")
            .join("Tom_s Book _2e_")
            .join("book.pdf")
    );
}

#[test]
fn stale_scan_of_missing_root_is_empty() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");
    assert!(find_stale_entries(&missing, &HashSet::new()).is_empty());
}

#[tokio::test]
async fn inspect_local_reports_size_and_mtime() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.pdf");
    write_local(&path, CONTENT, t(3));

    let record = inspect_local(&path).await.unwrap().unwrap();
    assert_eq!(record.size_bytes, CONTENT.len() as u64);
    assert_eq!(record.mtime.timestamp(), t(3).timestamp());
    assert!(inspect_local(&dir.path().join("b.pdf")).await.unwrap().is_none());
}
