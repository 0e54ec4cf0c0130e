fn main() {
    println!("cargo:rerun-if-changed=src/ffi.rs");

    let crate_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let config = cbindgen::Config::from_file("cbindgen.toml").unwrap_or_default();

    if let Ok(bindings) = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        bindings.write_to_file(format!("{}/include/vive_tracker.h", crate_dir));
    }

    if std::env::var_os("CARGO_FEATURE_LIGHTHOUSE").is_some() {
        println!("cargo:rustc-link-lib=dylib=survive");
    }
}
