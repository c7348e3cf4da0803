//! Build script for the Linux server binary.
//!
//! Gzips the web assets into `OUT_DIR` and generates an `assets.rs` with the
//! embedded byte ranges and their content hashes, replacing the compression
//! pipeline the firmware build runs over its web files.

use flate2::write::GzEncoder;
use flate2::{Compression, Crc};
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Assets served pre-compressed with content negotiation.
const COMPRESSED_ASSETS: &[(&str, &str)] = &[
    ("main.css", "MAIN_CSS"),
    ("index.js", "INDEX_JS"),
    ("manifest.json", "MANIFEST_JSON"),
    ("favicon.svg", "FAVICON_SVG"),
];

/// Assets embedded raw because they are filled per request.
const TEMPLATE_ASSETS: &[(&str, &str)] = &[("index.html", "INDEX_HTML")];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let asset_dir = Path::new("assets");
    println!("cargo:rerun-if-changed=assets");

    let mut generated = String::from("// Generated by build.rs - do not edit.\n\n");

    for (file, ident) in TEMPLATE_ASSETS {
        let path = asset_dir.join(file);
        generated.push_str(&format!(
            "pub static {ident}: &[u8] = include_bytes!({:?});\n",
            fs::canonicalize(&path).expect("asset missing")
        ));
    }

    for (file, ident) in COMPRESSED_ASSETS {
        let path = asset_dir.join(file);
        let data = fs::read(&path).unwrap_or_else(|e| panic!("reading {file}: {e}"));

        let mut crc = Crc::new();
        crc.update(&data);
        let etag = format!("{:08x}{:x}", crc.sum(), data.len());

        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&data).expect("gzip write");
        let compressed = encoder.finish().expect("gzip finish");

        let gz_path = Path::new(&out_dir).join(format!("{file}.gz"));
        fs::write(&gz_path, compressed).expect("writing compressed asset");

        generated.push_str(&format!(
            "pub static {ident}_GZ: &[u8] = include_bytes!({gz_path:?});\n"
        ));
        generated.push_str(&format!("pub static {ident}_ETAG: &str = {etag:?};\n"));
    }

    fs::write(Path::new(&out_dir).join("assets.rs"), generated).expect("writing assets.rs");
}
