use std::io::Result;

fn main() -> Result<()> {
    // Generate the PlatformHealth gRPC client and server from the wire schema.
    tonic_build::configure().compile_protos(&["proto/platform_health.proto"], &["proto/"])?;

    println!("cargo:rerun-if-changed=proto/platform_health.proto");

    Ok(())
}
