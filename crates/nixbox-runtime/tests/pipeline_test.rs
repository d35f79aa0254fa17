//! End-to-end tests for the nixbox pipeline with in-process collaborators.
//!
//! Covers resolution through registry aliases and remote extends, the merge
//! policies as seen in the rendered command, flake generation, and cache
//! reuse across repeated builds.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use nixbox_common::config::NixboxConfig;
use nixbox_common::error::{NixboxError, Result};
use nixbox_common::types::ImageRef;
use nixbox_compose::document::SourceFetcher;
use nixbox_compose::expand::EnvExpander;
use nixbox_compose::reference::Reference;
use nixbox_runtime::backend::{ContainerRuntime, EnvironmentBuilder};
use nixbox_runtime::command::RunOptions;
use nixbox_runtime::engine::{BuildOutcome, BuildRequest, Engine, RunOutcome, RunRequest};
use nixbox_runtime::flake::Owner;

#[derive(Default)]
struct World {
    loaded: Vec<PathBuf>,
    runs: Vec<Vec<String>>,
    flakes: Vec<String>,
}

#[derive(Clone, Default)]
struct Shared(Arc<Mutex<World>>);

impl Shared {
    fn with<T>(&self, f: impl FnOnce(&mut World) -> T) -> T {
        f(&mut self.0.lock().expect("world lock"))
    }
}

struct FakeRuntime(Shared);

impl ContainerRuntime for FakeRuntime {
    fn program(&self) -> &str {
        "docker"
    }
    fn image_exists(&self, _image: &ImageRef) -> Result<bool> {
        Ok(self.0.with(|w| !w.loaded.is_empty()))
    }
    fn load_image(&self, archive: &Path) -> Result<()> {
        self.0.with(|w| w.loaded.push(archive.to_path_buf()));
        Ok(())
    }
    fn run(&self, args: &[String], _interactive: bool) -> Result<()> {
        self.0.with(|w| w.runs.push(args.to_vec()));
        Ok(())
    }
    fn is_available(&self) -> bool {
        true
    }
}

struct FakeBuilder(Shared);

impl EnvironmentBuilder for FakeBuilder {
    fn build(&self, flake_dir: &Path) -> Result<PathBuf> {
        let flake = std::fs::read_to_string(flake_dir.join("flake.nix")).expect("flake written");
        self.0.with(|w| w.flakes.push(flake));
        let archive = flake_dir.join("result");
        std::fs::write(&archive, "archive").expect("archive");
        Ok(archive)
    }
    fn is_available(&self) -> bool {
        true
    }
}

struct FakeFetcher(HashMap<String, PathBuf>);

impl SourceFetcher for FakeFetcher {
    fn fetch(&self, reference: &Reference) -> Result<PathBuf> {
        self.0
            .get(reference.location())
            .cloned()
            .ok_or_else(|| NixboxError::FetchFailure {
                reference: reference.raw().to_string(),
                message: "not reachable".into(),
            })
    }
}

struct Fixture {
    _dirs: Vec<tempfile::TempDir>,
    project: PathBuf,
    engine: Engine,
    world: Shared,
}

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::create_dir_all(dir).expect("mkdir");
    std::fs::write(dir.join(name), content).expect("write");
}

fn fixture() -> Fixture {
    let data = tempfile::tempdir().expect("tempdir");
    let shared = tempfile::tempdir().expect("tempdir");
    let remote = tempfile::tempdir().expect("tempdir");
    let project = tempfile::tempdir().expect("tempdir");

    write(
        shared.path(),
        "devbox.yaml",
        "ports: [\"3000:3000\"]\nresources:\n  memory: 512m\nvolumes: [\"/data:/data\"]\nsecurity:\n  no_new_privileges: true\n",
    );
    write(&remote.path().join("node"), "devbox.yml", "env: [\"NODE_ENV=development\"]\n");
    write(
        project.path(),
        "devbox.yaml",
        &format!(
            "registry:\n  shared: {}\nextends:\n  - \"@shared\"\n  - \"github:acme/envs?dir=node#lts\"\nresources:\n  memory: 1g\nports: [\"3000:3000\", \"8080:8080\"]\nvolumes: [\"/data:/data:ro\", \"\\\\$HOME/x:/x\"]\n",
            shared.path().display()
        ),
    );

    let world = Shared::default();
    let config = NixboxConfig {
        data_dir: data.path().to_path_buf(),
        ..NixboxConfig::default()
    };
    let fetcher = FakeFetcher(HashMap::from([(
        "github:acme/envs".to_string(),
        remote.path().to_path_buf(),
    )]));
    let engine = Engine::new(config, false)
        .with_runtime(Box::new(FakeRuntime(world.clone())))
        .with_builder(Box::new(FakeBuilder(world.clone())))
        .with_fetcher(Box::new(fetcher))
        .with_expander(Box::new(EnvExpander::new(|_: &str| None)))
        .with_owner(Owner { uid: 1000, gid: 1000 });

    Fixture {
        project: project.path().to_path_buf(),
        _dirs: vec![data, shared, remote, project],
        engine,
        world,
    }
}

fn build_request(project: &Path) -> BuildRequest {
    BuildRequest {
        roots: Vec::new(),
        base_dir: project.to_path_buf(),
        image: ImageRef::parse("app-dev", None, None).expect("image"),
        force_rebuild: false,
        dry_run: false,
    }
}

#[test]
fn resolution_follows_extends_then_root() {
    let f = fixture();
    let resolution = f.engine.resolve(&[], &f.project).expect("resolve");
    let kinds: Vec<String> = resolution.references.iter().map(Reference::canonical).collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds[0].starts_with("path:"));
    assert_eq!(kinds[1], "github:acme/envs?dir=node#devShells.${system}.lts");
    assert!(kinds[2].starts_with("path:"));
    assert_eq!(resolution.merged.resources.memory.as_deref(), Some("1g"));
    assert_eq!(resolution.merged.ports, vec!["3000:3000", "8080:8080"]);
}

#[test]
fn second_build_reuses_artifact() {
    let f = fixture();
    let request = build_request(&f.project);

    let first = f.engine.build(&request).expect("first build");
    assert_eq!(first.outcome, BuildOutcome::Built);
    let second = f.engine.build(&request).expect("second build");
    assert_eq!(second.outcome, BuildOutcome::Reused);
    assert_eq!(first.fingerprint, second.fingerprint);

    let forced = BuildRequest {
        force_rebuild: true,
        ..request
    };
    assert_eq!(f.engine.build(&forced).expect("forced").outcome, BuildOutcome::Built);

    f.world.with(|w| {
        assert_eq!(w.flakes.len(), 2);
        assert_eq!(w.loaded.len(), 2);
        let flake = &w.flakes[0];
        assert!(flake.contains("src1.url = \"github:acme/envs?dir=node\";"));
        assert!(flake.contains("inputsFrom = [ shell0 shell1 shell2 ];"));
        assert!(flake.contains("mkdir -p './data'"));
    });
}

#[test]
fn build_dry_run_keeps_flake() {
    let f = fixture();
    let request = BuildRequest {
        dry_run: true,
        ..build_request(&f.project)
    };
    let report = f.engine.build(&request).expect("dry build");
    let BuildOutcome::DryRun { flake_dir } = report.outcome else {
        unreachable!("dry run never builds");
    };
    assert!(flake_dir.join("flake.nix").is_file());
    std::fs::remove_dir_all(&flake_dir).expect("cleanup");
    f.world.with(|w| assert!(w.flakes.is_empty()));
}

#[test]
fn run_builds_then_executes_merged_command() {
    let f = fixture();
    let request = RunRequest {
        build: build_request(&f.project),
        ports: vec!["9000:9000".into()],
        volumes: Vec::new(),
        env: vec!["DEBUG=1".into()],
        options: RunOptions {
            command: vec!["make".into(), "test".into()],
            ..RunOptions::default()
        },
    };

    let outcome = f.engine.run(&request).expect("run");
    assert!(matches!(outcome, RunOutcome::Completed { ref build } if build.outcome == BuildOutcome::Built));

    f.world.with(|w| {
        assert_eq!(w.runs.len(), 1);
        let args = &w.runs[0];
        let has = |flag: &str| args.iter().any(|a| a == flag);
        assert!(has("--security-opt=no-new-privileges"));
        assert!(has("--memory=1g"));
        assert!(has("--publish=9000:9000"));
        assert!(has("--env=NODE_ENV=development"));
        assert!(has("--env=DEBUG=1"));
        assert!(has("--volume=$HOME/x:/x"));
        assert_eq!(args.iter().filter(|a| a.starts_with("--volume=/data:")).count(), 1);
        assert!(has("--volume=/data:/data:ro"));
        assert_eq!(args[args.len() - 3..], ["app-dev:latest", "make", "test"]);
    });
}

#[test]
fn unreachable_remote_aborts_before_build() {
    let f = fixture();
    let engine = Engine::new(
        NixboxConfig {
            data_dir: f.project.join(".data"),
            ..NixboxConfig::default()
        },
        false,
    )
    .with_runtime(Box::new(FakeRuntime(f.world.clone())))
    .with_builder(Box::new(FakeBuilder(f.world.clone())))
    .with_fetcher(Box::new(FakeFetcher(HashMap::new())));

    let err = engine.build(&build_request(&f.project)).expect_err("fetch fails");
    assert!(matches!(err, NixboxError::FetchFailure { .. }));
    f.world.with(|w| assert!(w.flakes.is_empty() && w.loaded.is_empty()));
}
