use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use ndarray::{Array2, Array3};
use ndarray_npy::write_npy;
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[test]
fn help_lists_subcommands() -> Result<()> {
    cargo_run!("sbir", "--help")
        .success()
        .stdout(predicate::str::contains("server"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("check"));
    Ok(())
}

#[test]
fn check_empty_conf_dir() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;

    cargo_run!("sbir", "-c", conf_dir.path(), "check")
        .failure()
        .stderr(predicate::str::contains("配置错误"));

    Ok(())
}

#[rstest]
#[case::flat(false)]
#[case::single_slice(true)]
fn check_bad_gallery(#[case] three_dim: bool) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let gallery = conf_dir.child("embeddings.npy");
    if three_dim {
        write_npy(gallery.path(), &Array3::<f32>::zeros((1, 4, 8)))?;
    } else {
        write_npy(gallery.path(), &Array2::<f32>::zeros((4, 8)))?;
    }

    cargo_run!("sbir", "-c", conf_dir.path(), "check")
        .failure()
        .stderr(predicate::str::contains("配置错误"));

    Ok(())
}

#[test]
fn check_missing_model() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let gallery = conf_dir.child("gallery.npy");
    write_npy(gallery.path(), &Array3::<f32>::zeros((2, 4, 8)))?;

    cargo_run!("sbir", "-c", conf_dir.path(), "--gallery", gallery.path(), "check")
        .failure()
        .stderr(predicate::str::contains("模型文件不存在"));

    Ok(())
}

#[test]
fn check_with_model() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let gallery = conf_dir.child("embeddings.npy");
    write_npy(gallery.path(), &Array3::<f32>::zeros((2, 5, 3)))?;
    let model = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/mean_pool.onnx");

    cargo_run!("sbir", "-c", conf_dir.path(), "--model", model, "check")
        .success()
        .stdout(predicate::str::contains("entries : 5"))
        .stdout(predicate::str::contains("dim     : 3"));

    Ok(())
}

#[test]
fn search_missing_image() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;

    cargo_run!("sbir", "-c", conf_dir.path(), "search", conf_dir.path().join("nope.png"))
        .failure()
        .stderr(predicate::str::contains("无法读取图片"));

    Ok(())
}

#[test]
fn server_refuses_to_start_without_artifacts() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;

    cargo_run!("sbir", "-c", conf_dir.path(), "server", "--addr", "127.0.0.1:0")
        .failure()
        .stderr(predicate::str::contains("配置错误"));

    Ok(())
}
