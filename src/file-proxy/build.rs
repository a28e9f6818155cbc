// file-proxy writes cache files with unix permission bits
fn main() {
    if !std::env::var("CARGO_CFG_TARGET_FAMILY").map_or(false, |v| v.split(',').any(|f| f == "unix")) {
        eprintln!("error: file-proxy targets unix hosts only (cache files are created with unix modes).");
        std::process::exit(1);
    }
}
