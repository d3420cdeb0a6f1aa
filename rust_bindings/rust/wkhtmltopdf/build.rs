fn main() {
    println!("cargo:rerun-if-env-changed=WKHTMLTOX_DIR");

    #[cfg(feature = "native")]
    native::generate();
}

#[cfg(feature = "native")]
mod native {
    use std::env;
    use std::path::PathBuf;

    pub fn generate() {
        // Get install prefix from environment or use default
        let prefix = PathBuf::from(
            env::var("WKHTMLTOX_DIR").unwrap_or_else(|_| "/usr/local".to_string()),
        );

        println!("cargo:warning=Using wkhtmltox prefix: {}", prefix.display());

        let include_dir = prefix.join("include");
        let header = include_dir.join("wkhtmltox/pdf.h");
        println!("cargo:rerun-if-changed={}", header.display());

        if !header.exists() {
            panic!(
                "wkhtmltox header not found at {} (set WKHTMLTOX_DIR to the install prefix)",
                header.display()
            );
        }

        // Generate bindings
        let bindings = bindgen::Builder::default()
            .header(header.to_string_lossy())
            .clang_arg(format!("-I{}", include_dir.display()))
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            // Only generate bindings for the PDF API
            .allowlist_function("wkhtmltopdf_.*")
            .allowlist_type("wkhtmltopdf_.*")
            .generate_comments(true)
            .generate()
            .expect("Unable to generate bindings");

        let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set")).join("bindings.rs");
        bindings
            .write_to_file(&out_path)
            .expect("Couldn't write bindings!");

        let lib_dir = prefix.join("lib");
        let found = ["libwkhtmltox.so", "libwkhtmltox.dylib", "wkhtmltox.lib", "libwkhtmltox.a"]
            .iter()
            .any(|name| lib_dir.join(name).exists());

        if !found {
            println!("cargo:warning=");
            println!("cargo:warning===========================================");
            println!("cargo:warning=  libwkhtmltox Not Found");
            println!("cargo:warning===========================================");
            println!("cargo:warning=");
            println!("cargo:warning=The bindings were generated, but linking will fail");
            println!("cargo:warning=until libwkhtmltox is installed.");
            println!("cargo:warning=");
            println!("cargo:warning=Install the 0.12.x packages from https://wkhtmltopdf.org/downloads.html");
            println!("cargo:warning=or point WKHTMLTOX_DIR at an existing install prefix.");
            println!("cargo:warning=");
            println!("cargo:warning=Expected library in: {}", lib_dir.display());
            println!("cargo:warning===========================================");
            println!("cargo:warning=");
        }

        println!("cargo:rustc-link-search=native={}", lib_dir.display());
        for path in ["/usr/local/lib", "/usr/lib", "/usr/lib/x86_64-linux-gnu", "/usr/lib/aarch64-linux-gnu"] {
            if PathBuf::from(path).exists() {
                println!("cargo:rustc-link-search=native={}", path);
            }
        }

        println!("cargo:rustc-link-lib=wkhtmltox");
    }
}
