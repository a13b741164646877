const PROTO_ROOT: &str = "../../proto";
const HOSTLINK_PROTO: &str = "../../proto/hostlink.proto";

fn main() {
    compile_protos();
}

fn compile_protos() {
    // Vendored protoc keeps the build independent of a system install
    let protoc = protoc_bin_vendored::protoc_bin_path()
        .unwrap_or_else(|e| panic!("Failed to locate vendored protoc: {e}"));

    prost_build::Config::new()
        .protoc_executable(protoc)
        .type_attribute(".", "#[allow(clippy::large_enum_variant)]")
        .compile_protos(&[HOSTLINK_PROTO], &[PROTO_ROOT])
        .unwrap_or_else(|e| panic!("Failed to compile {HOSTLINK_PROTO}: {e}"));

    println!("cargo:rerun-if-changed={HOSTLINK_PROTO}");
}
