//! World reset against a throwaway server directory.

use std::fs;
use std::path::Path;

use mcmmo_launcher::supervisor::Supervisor;
use mcmmo_launcher::world::{self, BACKUP_PREFIX};

const PROPERTIES: &str = "\
#Minecraft server properties
#Sat Oct 18 09:00:00 KST 2026
motd=A mcMMO Server
level-seed=1
server-port=25565
";

fn server_dir() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("server.properties"), PROPERTIES).unwrap();
    for name in ["world", "world_nether", "world_the_end"] {
        let region = tmp.path().join(name).join("region");
        fs::create_dir_all(&region).unwrap();
        fs::write(tmp.path().join(name).join("level.dat"), name.as_bytes()).unwrap();
        fs::write(region.join("r.0.0.mca"), b"chunks").unwrap();
    }
    tmp
}

fn backups(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(BACKUP_PREFIX))
        .collect();
    names.sort();
    names
}

#[test]
fn reset_backs_up_then_deletes() {
    let tmp = server_dir();
    let props = tmp.path().join("server.properties");

    let report = world::reset_world(tmp.path(), &props, "12345").unwrap();

    assert_eq!(report.seed, "12345");
    assert_eq!(report.snapshot.copied, vec!["world", "world_nether", "world_the_end"]);
    assert_eq!(report.deleted, report.snapshot.copied);
    assert_eq!(report.delete_failures, 0);

    for name in ["world", "world_nether", "world_the_end"] {
        assert!(!tmp.path().join(name).exists(), "{} should be gone", name);
        let saved = report.snapshot.root.join(name);
        assert_eq!(fs::read(saved.join("level.dat")).unwrap(), name.as_bytes());
        assert_eq!(fs::read(saved.join("region").join("r.0.0.mca")).unwrap(), b"chunks");
    }
}

#[test]
fn reset_rewrites_only_the_seed() {
    let tmp = server_dir();
    let props = tmp.path().join("server.properties");

    world::reset_world(tmp.path(), &props, "12345").unwrap();

    let text = fs::read_to_string(&props).unwrap();
    assert_eq!(text, PROPERTIES.replace("level-seed=1", "level-seed=12345"));
}

#[test]
fn empty_seed_means_random() {
    let tmp = server_dir();
    let props = tmp.path().join("server.properties");

    let report = world::reset_world(tmp.path(), &props, "   ").unwrap();

    assert_eq!(report.seed, "");
    let text = fs::read_to_string(&props).unwrap();
    assert!(text.lines().any(|l| l == "level-seed="));
    assert!(text.contains("motd=A mcMMO Server"));
}

#[test]
fn missing_seed_key_is_appended() {
    let tmp = tempfile::tempdir().unwrap();
    let props = tmp.path().join("server.properties");
    fs::write(&props, "motd=hi\n").unwrap();

    world::reset_world(tmp.path(), &props, "-42").unwrap();
    assert_eq!(fs::read_to_string(&props).unwrap(), "motd=hi\nlevel-seed=-42\n");
}

#[test]
fn no_worlds_still_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let props = tmp.path().join("server.properties");

    let report = world::reset_world(tmp.path(), &props, "7").unwrap();

    assert!(report.snapshot.copied.is_empty());
    assert!(report.deleted.is_empty());
    assert!(report.snapshot.root.is_dir());
    assert!(fs::read_to_string(&props).unwrap().contains("level-seed=7"));
}

#[test]
fn repeated_resets_keep_every_backup() {
    let tmp = server_dir();
    let props = tmp.path().join("server.properties");

    let first = world::reset_world(tmp.path(), &props, "111").unwrap();
    // the server would regenerate a world between resets
    fs::create_dir_all(tmp.path().join("world")).unwrap();
    fs::write(tmp.path().join("world").join("level.dat"), b"second").unwrap();
    let second = world::reset_world(tmp.path(), &props, "222").unwrap();

    assert_ne!(first.snapshot.root, second.snapshot.root);
    assert_eq!(backups(tmp.path()).len(), 2);
    assert_eq!(
        fs::read(first.snapshot.root.join("world").join("level.dat")).unwrap(),
        b"world"
    );
    assert_eq!(
        fs::read(second.snapshot.root.join("world").join("level.dat")).unwrap(),
        b"second"
    );
    assert!(fs::read_to_string(&props).unwrap().contains("level-seed=222"));
}

#[tokio::test]
async fn supervisor_reset_without_server() {
    let tmp = server_dir();
    let props = tmp.path().join("server.properties");
    let supervisor = Supervisor::default();

    let report = supervisor.reset_world(tmp.path(), &props, "99").await.unwrap();
    assert_eq!(report.seed, "99");
    assert_eq!(backups(tmp.path()).len(), 1);
}
