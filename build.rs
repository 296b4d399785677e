//! Build script for compiling Protocol Buffer schemas

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protos = &["proto/broker.proto"];

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(protos, &["proto"])?;

    Ok(())
}
