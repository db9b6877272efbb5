//! Deployment checkout against a real git origin in a temp directory.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use prer_core::commitmsg;
use prer_core::git::{CloneOptions, DeployRepo, GitRepo};
use prer_core::reconcile::{reconcile_branch, BranchState};

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=prer", "-c", "user.email=prer@test.local"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should be installed");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn write(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// Origin with `master` and an existing `deploy/alpha` recording `targets`.
fn origin(dir: &Path, alpha_targets: &[&str]) {
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    write(dir, "README.md", "gitops\n");
    write(dir, "cloud/base.yaml", "kind: Namespace\n");
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "initial"]);

    git(dir, &["checkout", "-q", "-b", "deploy/alpha"]);
    write(dir, "cloud/alpha.yaml", "replicas: 1\n");
    git(dir, &["add", "."]);
    let message = commitmsg::deployment_message("master", "feature/a", "0001", alpha_targets);
    git(dir, &["commit", "-q", "-m", &message]);
    git(dir, &["checkout", "-q", "master"]);
}

fn clone_options(root: &Path) -> CloneOptions {
    CloneOptions {
        repo: root.join("origin").to_string_lossy().into_owned(),
        dir: root.join("work"),
        mirror: None,
        base_branch: "master".to_string(),
        subpath: "cloud".to_string(),
        branch_prefix: "deploy/".to_string(),
    }
}

async fn checkout(root: &Path) -> GitRepo {
    let opts = clone_options(root);
    let repo = GitRepo::clone_or_checkout(&opts).await.unwrap();
    git(&opts.dir, &["config", "user.name", "prer"]);
    git(&opts.dir, &["config", "user.email", "prer@test.local"]);
    repo
}

fn setup(alpha_targets: &[&str]) -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let origin_dir = tmp.path().join("origin");
    std::fs::create_dir_all(&origin_dir).unwrap();
    origin(&origin_dir, alpha_targets);
    tmp
}

#[tokio::test]
async fn test_clone_is_sparse_and_sees_deploy_branches() {
    let tmp = setup(&["//a:push"]);
    let mut repo = checkout(tmp.path()).await;

    assert!(repo.root().join("cloud/base.yaml").exists());
    assert!(!repo.root().join("README.md").exists(), "outside the sparse path");

    let created = repo.switch_to_branch("deploy/alpha", "master").await.unwrap();
    assert!(!created, "deploy/alpha exists on the remote");
    let message = repo.last_commit_message().await.unwrap();
    assert!(message.starts_with("GitOps for release branch master from feature/a commit 0001"));
    assert_eq!(
        commitmsg::extract_targets(&message),
        BTreeSet::from(["//a:push".to_string()])
    );
}

#[tokio::test]
async fn test_commit_reports_changes_only_once() {
    let tmp = setup(&["//a:push"]);
    let mut repo = checkout(tmp.path()).await;

    assert!(repo.switch_to_branch("deploy/beta", "master").await.unwrap());
    write(repo.root(), "cloud/beta.yaml", "replicas: 2\n");

    assert!(repo.commit("beta deploy", "cloud").await.unwrap());
    assert!(!repo.commit("beta deploy again", "cloud").await.unwrap());
    assert!(repo.is_clean().await.unwrap());
}

#[tokio::test]
async fn test_push_publishes_branch_to_origin() {
    let tmp = setup(&["//a:push"]);
    let mut repo = checkout(tmp.path()).await;

    repo.switch_to_branch("deploy/beta", "master").await.unwrap();
    write(repo.root(), "cloud/beta.yaml", "replicas: 2\n");
    repo.commit("beta deploy", "cloud").await.unwrap();
    repo.push(&["deploy/beta".to_string()]).await.unwrap();

    let origin = tmp.path().join("origin");
    let subject = git(&origin, &["log", "-1", "--pretty=%s", "deploy/beta"]);
    assert_eq!(subject.trim(), "beta deploy");
}

#[tokio::test]
async fn test_removed_target_recreates_branch_from_base() {
    let tmp = setup(&["//a:push", "//old:push"]);
    let mut repo = checkout(tmp.path()).await;

    let state = reconcile_branch(&mut repo, "deploy/alpha", "master", &["//a:push"])
        .await
        .unwrap();

    assert_eq!(state, BranchState::ExistsStale);
    assert_eq!(repo.last_commit_message().await.unwrap().trim(), "initial");
    assert!(!repo.root().join("cloud/alpha.yaml").exists());
    let head = git(repo.root(), &["rev-parse", "--abbrev-ref", "HEAD"]);
    assert_eq!(head.trim(), "deploy/alpha");
}

#[tokio::test]
async fn test_superset_keeps_branch_history() {
    let tmp = setup(&["//a:push"]);
    let mut repo = checkout(tmp.path()).await;

    let state = reconcile_branch(&mut repo, "deploy/alpha", "master", &["//a:push", "//b:push"])
        .await
        .unwrap();

    assert_eq!(state, BranchState::ExistsReusable);
    assert!(repo.root().join("cloud/alpha.yaml").exists());
}

#[tokio::test]
async fn test_clone_of_missing_repository_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let opts = CloneOptions {
        repo: tmp.path().join("nope").to_string_lossy().into_owned(),
        dir: tmp.path().join("work"),
        mirror: None,
        base_branch: "master".to_string(),
        subpath: "cloud".to_string(),
        branch_prefix: "deploy/".to_string(),
    };
    assert!(GitRepo::clone_or_checkout(&opts).await.is_err());
}

#[tokio::test]
async fn test_existing_checkout_is_refreshed_not_recloned() {
    let tmp = setup(&["//a:push"]);
    let mut repo = checkout(tmp.path()).await;

    // Leave the first run's leftovers behind.
    repo.switch_to_branch("deploy/beta", "master").await.unwrap();
    write(repo.root(), "cloud/beta.yaml", "replicas: 2\n");
    repo.commit("beta deploy", "cloud").await.unwrap();
    write(repo.root(), "cloud/scratch.yaml", "junk\n");

    let origin = tmp.path().join("origin");
    write(&origin, "cloud/new.yaml", "kind: ConfigMap\n");
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "-q", "-m", "second"]);

    let mut again = GitRepo::clone_or_checkout(&clone_options(tmp.path()))
        .await
        .unwrap();

    let head = git(again.root(), &["rev-parse", "--abbrev-ref", "HEAD"]);
    assert_eq!(head.trim(), "master");
    assert_eq!(again.last_commit_message().await.unwrap().trim(), "second");
    assert!(again.root().join("cloud/new.yaml").exists());
    assert!(!again.root().join("cloud/scratch.yaml").exists());
    assert!(!again.root().join("cloud/beta.yaml").exists());
    assert!(
        again.switch_to_branch("deploy/beta", "master").await.unwrap(),
        "unpushed local branch must not survive a refresh"
    );
    assert!(!again.switch_to_branch("deploy/alpha", "master").await.unwrap());
}
