fn main() {
    if let Ok(lib) = pkg_config::probe_library("z3") {
        for path in lib.link_paths {
            println!("cargo:rustc-link-search=native={}", path.display());
        }
        return;
    }
    println!("cargo:rustc-link-lib=dylib=z3");
}
