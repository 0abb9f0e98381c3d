use std::env::var;
use std::io::Result;

fn main() -> Result<()> {
    if var("PROTOC").is_err() {
        // SAFETY: build scripts are single-threaded at this point.
        unsafe {
            std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
        }
    }

    // Proto files compiled into the descriptor set. Only test.proto carries
    // a service the tests actually implement; the others exist to exercise
    // schema handling (imports, extensions, well-known types).
    let proto_files = &[
        "proto/testing/test.proto",
        "proto/testing/example.proto",
        "proto/testing/known_types.proto",
    ];

    let proto_folder = "proto";
    let out_dir = var("OUT_DIR").expect("Missing OUT_DIR environment variable");
    let descriptors_path = format!("{}/descriptors.bin", out_dir);

    tonic_prost_build::configure()
        .file_descriptor_set_path(descriptors_path)
        .protoc_arg("--experimental_allow_proto3_optional")
        .build_client(false)
        .compile_protos(proto_files, &[proto_folder])
        .unwrap();

    Ok(())
}
