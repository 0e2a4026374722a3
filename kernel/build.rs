fn main() {
    // Host builds only exist to run the unit tests, they get no linker script.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();

    // Tell cargo to pass the linker script to the linker..
    println!("cargo:rustc-link-arg-bins=-T{manifest_dir}/src/arch/{arch}/linker.ld");
    // ..and to re-run if it changes.
    println!("cargo:rerun-if-changed=src/arch/{arch}/linker.ld");
}
