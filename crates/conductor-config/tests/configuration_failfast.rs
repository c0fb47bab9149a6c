//! A daemon started with broken configuration files refuses to start and
//! names every broken file, not just the first one it read.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use ortho_config::{OrthoConfig, OrthoError};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use conductor_config::Config;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const CONFIG_PATH_VAR: &str = "CONDUCTOR_CONFIG_PATH";

/// Points `CONDUCTOR_CONFIG_PATH` at a file for the lifetime of the value.
struct ConfigPathEnv {
    previous: Option<OsString>,
    _guard: MutexGuard<'static, ()>,
}

impl ConfigPathEnv {
    fn point_at(path: &Path) -> Self {
        let guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::env::var_os(CONFIG_PATH_VAR);
        // ENV_MUTEX serialises every mutation in this binary.
        unsafe { std::env::set_var(CONFIG_PATH_VAR, path) };
        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for ConfigPathEnv {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(CONFIG_PATH_VAR, value) },
            None => unsafe { std::env::remove_var(CONFIG_PATH_VAR) },
        }
    }
}

#[fixture]
fn config_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write config file");
    path
}

fn failing_files(error: &OrthoError) -> Vec<PathBuf> {
    let OrthoError::Aggregate(aggregate) = error else {
        panic!("expected an aggregated error, got {error:?}");
    };
    let mut paths: Vec<PathBuf> = aggregate
        .iter()
        .filter_map(|layer| match layer {
            OrthoError::File { path, .. } => Some(path.clone()),
            _ => None,
        })
        .collect();
    paths.sort();
    paths
}

#[rstest]
#[case::backend_and_clients(
    "reader_backend = socket and rpc",
    "max_clients = 32 clients"
)]
#[case::clients_and_timeout(
    "max_clients = [",
    "monitor_timeout_secs = 10s"
)]
#[case::socket_and_uid(
    r#"daemon_socket = { transport = "unix" path = "/run/conductor.sock" }"#,
    "system_uid = = 1000"
)]
fn every_broken_layer_is_reported(
    config_dir: TempDir,
    #[case] flag_file: &str,
    #[case] env_file: &str,
) {
    let flag_path = write_config(&config_dir, "flag_conductor.toml", flag_file);
    let env_path = write_config(&config_dir, "env_conductor.toml", env_file);
    let _env = ConfigPathEnv::point_at(&env_path);

    let args = [
        OsString::from("conductord"),
        OsString::from("--config-path"),
        flag_path.clone().into_os_string(),
    ];
    let error = Config::load_from_iter(args).expect_err("broken files must stop the load");

    assert!(
        error.to_string().contains("multiple configuration errors"),
        "unexpected message: {error}"
    );
    let mut expected = vec![flag_path, env_path];
    expected.sort();
    assert_eq!(failing_files(error.as_ref()), expected);
}
