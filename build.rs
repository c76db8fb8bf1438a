fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    // The `Connect` rpc would otherwise clash with the generated
    // transport constructor `SchedulerServiceClient::connect`.
    tonic_build::configure()
        .build_transport(false)
        .compile_protos(&["proto/scheduler.proto"], &["proto"])?;
    println!("cargo:rerun-if-changed=proto/scheduler.proto");
    Ok(())
}
