//! Builds the shared-object fixtures the live hook test loads.
//!
//! Two builds of the same source: one binds `read` through a lazy PLT slot,
//! the other through a GOT entry that ends up under full RELRO. Their paths
//! reach the tests as `IOCANCEL_FIXTURE_LAZY` / `IOCANCEL_FIXTURE_NOW`.
//! Without a working C compiler the variables are left unset.

use std::path::{Path, PathBuf};
use std::process::Command;

const SOURCE: &str = "tests/fixtures/fixture_read.c";

struct Fixture {
    env: &'static str,
    soname: &'static str,
    flags: &'static [&'static str],
}

const FIXTURES: &[Fixture] = &[
    Fixture {
        env: "IOCANCEL_FIXTURE_LAZY",
        soname: "libiocancel_fixture_lazy.so.1",
        flags: &["-Wl,-z,lazy"],
    },
    Fixture {
        env: "IOCANCEL_FIXTURE_NOW",
        soname: "libiocancel_fixture_now.so.1",
        flags: &["-fno-plt", "-Wl,-z,now", "-Wl,-z,relro"],
    },
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={SOURCE}");

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "linux" {
        return;
    }
    let Some(out_dir) = std::env::var_os("OUT_DIR").map(PathBuf::from) else {
        return;
    };

    for fixture in FIXTURES {
        let output = out_dir.join(fixture.soname);
        match build_fixture(fixture, &output) {
            Ok(()) => println!("cargo:rustc-env={}={}", fixture.env, output.display()),
            Err(message) => println!("cargo:warning=fixture {} not built: {message}", fixture.soname),
        }
    }
}

fn build_fixture(fixture: &Fixture, output: &Path) -> Result<(), String> {
    let compiler = cc::Build::new()
        .pic(true)
        .cargo_metadata(false)
        .try_get_compiler()
        .map_err(|err| err.to_string())?;

    let mut cmd: Command = compiler.to_command();
    cmd.arg("-shared")
        .args(fixture.flags)
        .arg(format!("-Wl,-soname,{}", fixture.soname))
        .arg("-o")
        .arg(output)
        .arg(SOURCE);

    let status = cmd.status().map_err(|err| err.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("{cmd:?} exited with {status}"))
    }
}
