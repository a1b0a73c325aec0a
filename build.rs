use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_file = "./proto/scraper.proto";
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    println!("cargo:rerun-if-changed={proto_file}");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&[proto_file], &["proto"])?;
    Ok(())
}
