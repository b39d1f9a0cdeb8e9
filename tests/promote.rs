use std::sync::Arc;
use stevedore::{
    ContentDigest, ImageName, Manifest, MasterInventory, MemoryRegistry, PromoteError,
    RegistryName, SyncContext, SyncOptions, Tag,
};
use tokio_util::sync::CancellationToken;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn digest(hex: char) -> ContentDigest {
    format!("sha256:{}", String::from(hex).repeat(64))
        .parse()
        .unwrap()
}

fn registry(s: &str) -> RegistryName {
    s.parse().unwrap()
}

fn image(s: &str) -> ImageName {
    s.parse().unwrap()
}

fn tag(s: &str) -> Tag {
    s.parse().unwrap()
}

fn manifest_for(digest_hex: char, tags: &[&str]) -> Manifest {
    let tag_list = tags
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(", ");
    Manifest::parse_yaml(&format!(
        "
registries:
  - name: gcr.io/src
    src: true
  - name: gcr.io/dst
images:
  - name: foo
    dmap:
      \"sha256:{}\": [{}]
",
        String::from(digest_hex).repeat(64),
        tag_list
    ))
    .unwrap()
}

fn seeded(entries: &[(&str, &str, char, &[&str])]) -> MemoryRegistry {
    let mut inventory = MasterInventory::new();
    for (reg, img, hex, tags) in entries {
        inventory.record(
            &registry(reg),
            &image(img),
            digest(*hex),
            tags.iter().map(|t| tag(t)),
        );
    }
    MemoryRegistry::with_inventory(inventory)
}

async fn run(
    memory: &Arc<MemoryRegistry>,
    manifests: Vec<Manifest>,
    options: SyncOptions,
) -> (SyncContext, stevedore::PromotionResults) {
    let mut ctx = SyncContext::new(manifests, options).unwrap();
    let results = ctx
        .promote(
            memory.as_ref(),
            memory.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    (ctx, results)
}

#[tokio::test]
async fn fresh_copy_lands_content_and_tag() {
    init_logging();
    let memory = Arc::new(seeded(&[("gcr.io/src", "foo", 'a', &["v1"])]));

    let (ctx, results) = run(&memory, vec![manifest_for('a', &["v1"])], SyncOptions::default()).await;
    assert!(results.ok());
    assert_eq!(results.succeeded.len(), 1);
    assert!(!ctx.has_errors());

    let contents = memory.contents();
    let repo = contents
        .registry(&registry("gcr.io/dst"))
        .unwrap()
        .image(&image("foo"))
        .unwrap();
    assert_eq!(repo.digest_of_tag(&tag("v1")), Some(&digest('a')));
}

#[tokio::test]
async fn retagging_needs_no_copy() {
    init_logging();
    let memory = Arc::new(seeded(&[
        ("gcr.io/src", "foo", 'a', &["v1"]),
        ("gcr.io/dst", "foo", 'a', &["v1"]),
    ]));

    let (_, results) = run(
        &memory,
        vec![manifest_for('a', &["v1", "stable"])],
        SyncOptions::default(),
    )
    .await;
    assert!(results.ok());
    assert_eq!(results.succeeded.len(), 1);

    let contents = memory.contents();
    let repo = contents
        .registry(&registry("gcr.io/dst"))
        .unwrap()
        .image(&image("foo"))
        .unwrap();
    let tags = repo.tags_of(&digest('a')).unwrap();
    assert!(tags.contains(&tag("v1")));
    assert!(tags.contains(&tag("stable")));
}

#[tokio::test]
async fn forbidden_move_is_recorded_and_skipped() {
    init_logging();
    let memory = Arc::new(seeded(&[
        ("gcr.io/src", "foo", 'b', &[]),
        ("gcr.io/dst", "foo", 'a', &["v1"]),
    ]));
    let before = memory.contents();

    let (ctx, results) = run(&memory, vec![manifest_for('b', &["v1"])], SyncOptions::default()).await;
    assert!(results.succeeded.is_empty());
    assert!(ctx.has_errors());
    let errors = ctx.take_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], PromoteError::MoveForbidden { .. }));

    // nothing was touched
    assert_eq!(memory.contents(), before);
}

#[tokio::test]
async fn permitted_move_retargets_the_tag() {
    init_logging();
    let memory = Arc::new(seeded(&[
        ("gcr.io/src", "foo", 'b', &[]),
        ("gcr.io/dst", "foo", 'a', &["v1"]),
    ]));

    let options = SyncOptions {
        permit_moves: true,
        ..SyncOptions::default()
    };
    let (ctx, results) = run(&memory, vec![manifest_for('b', &["v1"])], options).await;
    assert!(results.ok());
    assert_eq!(results.succeeded.len(), 1);
    assert!(!ctx.has_errors());

    let contents = memory.contents();
    let repo = contents
        .registry(&registry("gcr.io/dst"))
        .unwrap()
        .image(&image("foo"))
        .unwrap();
    assert_eq!(repo.digest_of_tag(&tag("v1")), Some(&digest('b')));
    // the old digest stays, now untagged
    assert!(repo.has_digest(&digest('a')));
    assert!(repo.tags_of(&digest('a')).unwrap().is_empty());
}

#[tokio::test]
async fn partial_failure_spares_the_other_edges() {
    init_logging();
    let memory = Arc::new(seeded(&[
        ("gcr.io/src", "foo", 'a', &["v1"]),
        ("gcr.io/src", "foo", 'b', &["v2"]),
    ]));
    memory.refuse_copies(digest('b'));

    let manifest = Manifest::parse_yaml(&format!(
        "
registries:
  - name: gcr.io/src
    src: true
  - name: gcr.io/dst
images:
  - name: foo
    dmap:
      \"sha256:{}\": [\"v1\"]
      \"sha256:{}\": [\"v2\"]
",
        "a".repeat(64),
        "b".repeat(64)
    ))
    .unwrap();

    let (ctx, results) = run(&memory, vec![manifest], SyncOptions::default()).await;
    assert_eq!(results.succeeded.len(), 1);
    assert_eq!(results.failed.len(), 1);
    assert!(!results.ok());
    assert!(ctx.has_errors());

    // the healthy edge completed fully; the failed one never got its tag
    let contents = memory.contents();
    let repo = contents
        .registry(&registry("gcr.io/dst"))
        .unwrap()
        .image(&image("foo"))
        .unwrap();
    assert_eq!(repo.digest_of_tag(&tag("v1")), Some(&digest('a')));
    assert!(!repo.has_digest(&digest('b')));
    assert_eq!(repo.digest_of_tag(&tag("v2")), None);
}

#[tokio::test]
async fn second_run_has_nothing_to_do() {
    init_logging();
    let memory = Arc::new(seeded(&[("gcr.io/src", "foo", 'a', &["v1", "stable"])]));
    let manifests = vec![manifest_for('a', &["v1", "stable"])];

    let (_, first) = run(&memory, manifests.clone(), SyncOptions::default()).await;
    assert!(first.ok());
    assert!(!first.succeeded.is_empty());

    let settled = memory.contents();
    let (ctx, second) = run(&memory, manifests, SyncOptions::default()).await;
    assert!(second.ok());
    assert!(second.succeeded.is_empty());
    assert!(!ctx.has_errors());
    assert_eq!(memory.contents(), settled);
}

#[tokio::test]
async fn dry_run_changes_nothing() {
    init_logging();
    let memory = Arc::new(seeded(&[("gcr.io/src", "foo", 'a', &["v1"])]));
    let before = memory.contents();

    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let (ctx, results) = run(&memory, vec![manifest_for('a', &["v1"])], options).await;

    // the preview succeeds edge by edge while touching nothing
    assert!(results.ok());
    assert_eq!(results.succeeded.len(), 1);
    assert!(!ctx.has_errors());
    assert_eq!(memory.contents(), before);
}

#[tokio::test]
async fn cancellation_discards_queued_edges() {
    init_logging();
    let memory = Arc::new(seeded(&[("gcr.io/src", "foo", 'a', &["v1"])]));
    let before = memory.contents();

    let mut ctx = SyncContext::new(vec![manifest_for('a', &["v1"])], SyncOptions::default()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let results = ctx
        .promote(memory.as_ref(), memory.clone(), &cancel)
        .await
        .unwrap();

    assert!(results.succeeded.is_empty());
    assert!(results.failed.is_empty());
    assert_eq!(results.cancelled.len(), 1);
    assert!(ctx.has_errors());
    assert!(matches!(
        ctx.take_errors()[0],
        PromoteError::Cancelled(_)
    ));
    assert_eq!(memory.contents(), before);
}

#[tokio::test]
async fn unreadable_source_drops_edges_instead_of_promoting_blind() {
    init_logging();
    let memory = Arc::new(seeded(&[("gcr.io/src", "foo", 'a', &["v1"])]));
    memory.refuse_reads(registry("gcr.io/src"));
    let before = memory.contents();

    let (ctx, results) = run(&memory, vec![manifest_for('a', &["v1"])], SyncOptions::default()).await;
    assert!(results.succeeded.is_empty());
    assert!(ctx.has_errors());
    let errors = ctx.take_errors();
    assert!(errors
        .iter()
        .any(|error| matches!(error, PromoteError::Read { .. })));
    assert!(errors
        .iter()
        .any(|error| matches!(error, PromoteError::SourceMissing { .. })));
    assert_eq!(memory.contents(), before);
}

#[tokio::test]
async fn promotion_fans_out_across_destinations() {
    init_logging();
    let memory = Arc::new(seeded(&[("gcr.io/src", "foo", 'a', &["v1"])]));
    let manifest = Manifest::parse_yaml(&format!(
        "
registries:
  - name: gcr.io/src
    src: true
  - name: gcr.io/dst
  - name: us.gcr.io/dst
images:
  - name: foo
    dmap:
      \"sha256:{}\": [\"v1\"]
",
        "a".repeat(64)
    ))
    .unwrap();

    let (_, results) = run(&memory, vec![manifest], SyncOptions::default()).await;
    assert!(results.ok());
    assert_eq!(results.succeeded.len(), 2);

    let contents = memory.contents();
    for dst in ["gcr.io/dst", "us.gcr.io/dst"] {
        let repo = contents
            .registry(&registry(dst))
            .unwrap()
            .image(&image("foo"))
            .unwrap();
        assert_eq!(repo.digest_of_tag(&tag("v1")), Some(&digest('a')));
    }
}
