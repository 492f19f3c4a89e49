use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

mod util;
use util::write;

/// Binary run from inside `home`, with no user config or environment leaking in.
fn base_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rpi-deploy"));
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("RPI_DEPLOY_HOST")
        .env_remove("RPI_DEPLOY_USER")
        .env_remove("RPI_DEPLOY_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_flags() {
    let home = TempDir::new().unwrap();
    base_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--engine"))
        .stdout(contains("--dry-run"))
        .stdout(contains("--checksum-mode"));
}

#[test]
fn missing_engine_is_configuration_error() {
    let home = TempDir::new().unwrap();
    base_cmd(&home)
        .arg("--dry-run")
        .assert()
        .code(2)
        .stderr(contains("--engine"));
}

#[test]
fn missing_ignore_file_exits_before_connecting() {
    let home = TempDir::new().unwrap();
    write(home.path(), "engine/CMakeLists.txt", "project(engine)");
    write(home.path(), "apps/dash/main.cpp", "int main() {}");

    base_cmd(&home)
        .args(["--engine", "engine", "--applications", "apps", "--host", "127.0.0.1", "--port", "1"])
        .assert()
        .code(2)
        .stderr(contains(".rpiignore file not found"));
}

#[test]
fn unknown_checksum_mode_is_rejected() {
    let home = TempDir::new().unwrap();
    base_cmd(&home)
        .args(["--engine", "engine", "--checksum-mode", "sometimes"])
        .assert()
        .failure()
        .stderr(contains("sometimes"));
}

#[test]
fn dry_run_walks_both_trees() {
    let home = TempDir::new().unwrap();
    write(home.path(), "engine/CMakeLists.txt", "project(engine)");
    write(home.path(), "engine/okay/scripts/install.bash", "#!/bin/bash\n");
    write(home.path(), "engine/.git/HEAD", "ref: refs/heads/main");
    write(home.path(), "apps/dash/main.cpp", "int main() {}");
    write(home.path(), "apps/.rpiignore", ".git/\n");

    base_cmd(&home)
        .args([
            "--engine",
            "engine",
            "--applications",
            "apps",
            "--dry-run",
            "--no-progress",
        ])
        .assert()
        .success()
        .stdout(contains("Uploading: "))
        .stdout(contains("dash/engine/CMakeLists.txt"))
        .stdout(contains("dash/applications/dash/main.cpp"))
        .stdout(contains(".git").not())
        .stdout(contains("Done."));
}

#[test]
fn config_file_supplies_engine() {
    let home = TempDir::new().unwrap();
    write(home.path(), "engine/okay/scripts/install.bash", "#!/bin/bash\n");
    write(home.path(), "apps/telemetry/main.cpp", "int main() {}");
    write(home.path(), "apps/.rpiignore", "");
    write(
        home.path(),
        "deploy.toml",
        "engine = \"engine\"\napplications = \"apps\"\n\n[layout]\napp = \"telemetry\"\n",
    );

    base_cmd(&home)
        .args(["--config", "deploy.toml", "--dry-run", "--no-progress"])
        .assert()
        .success()
        .stdout(contains("dash/applications/telemetry/main.cpp"));
}
